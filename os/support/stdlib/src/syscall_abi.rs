//! Numbers and records shared by the trap gate and user programs.
//!
//! A trap carries the syscall number in `eax` and up to three arguments in
//! `ebx`, `ecx` and `edx`; the result comes back in `eax`.

/// Returned in `eax` by every call that can fail (`-1` as a signed value).
pub const FAILURE: u32 = u32::MAX;

pub const STDOUT: u32 = 1;
pub const STDERR: u32 = 2;

/// `Exec` flag: run the child detached and return its pid.
pub const EXEC_BACKGROUND: u32 = 1;

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sysno {
    /// Terminate the caller; `ebx` is the exit code.
    Exit = 0,
    /// Write `edx` bytes at `ecx` to descriptor `ebx` (1 or 2).
    Write = 1,
    /// Block until a key is available.
    GetChar = 5,
    /// Next key or 0.
    GetCharNonblock = 8,
    /// Grow the heap by `ebx` (signed) bytes; returns the old break.
    Sbrk = 9,
    /// Sleep for `ebx` milliseconds.
    Sleep = 10,
    /// Launch program `ebx` with arguments `ecx`; `edx` holds flags.
    Exec = 11,
    /// Fill the [`MemInfo`] at `ebx`.
    MemInfo = 12,
    /// Kernel panic with the message at `ebx`. Does not return.
    Panic = 13,
    /// Timer ticks since boot.
    Uptime = 14,
}

impl TryFrom<u32> for Sysno {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Exit,
            1 => Self::Write,
            5 => Self::GetChar,
            8 => Self::GetCharNonblock,
            9 => Self::Sbrk,
            10 => Self::Sleep,
            11 => Self::Exec,
            12 => Self::MemInfo,
            13 => Self::Panic,
            14 => Self::Uptime,
            other => return Err(other),
        })
    }
}

/// Memory usage as reported by `Sysno::MemInfo`, all sizes in KiB.
///
/// Stored in user memory as seven little-endian words in field order.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct MemInfo {
    pub phys_total_kb: u32,
    pub phys_used_kb: u32,
    pub phys_free_kb: u32,
    pub virt_total_kb: u32,
    pub virt_used_kb: u32,
    pub virt_free_kb: u32,
    pub procs: u32,
}

impl MemInfo {
    pub const SIZE: usize = 7 * 4;

    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let words = [
            self.phys_total_kb,
            self.phys_used_kb,
            self.phys_free_kb,
            self.virt_total_kb,
            self.virt_used_kb,
            self.virt_free_kb,
            self.procs,
        ];
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    #[must_use]
    pub fn from_bytes(raw: &[u8; Self::SIZE]) -> Self {
        let mut words = raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
        let mut next = || words.next().unwrap_or(0);
        Self {
            phys_total_kb: next(),
            phys_used_kb: next(),
            phys_free_kb: next(),
            virt_total_kb: next(),
            virt_used_kb: next(),
            virt_free_kb: next(),
            procs: next(),
        }
    }
}
