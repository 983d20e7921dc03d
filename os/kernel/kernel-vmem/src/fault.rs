use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// What a memory access wants to do, and from which privilege level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Access {
    pub write: bool,
    pub user: bool,
}

impl Access {
    pub const USER_READ: Self = Self {
        write: false,
        user: true,
    };
    pub const USER_WRITE: Self = Self {
        write: true,
        user: true,
    };
    pub const KERNEL_READ: Self = Self {
        write: false,
        user: false,
    };
    pub const KERNEL_WRITE: Self = Self {
        write: true,
        user: false,
    };
}

/// Page-fault error code layout (32-bit x86).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15 “Page-Fault Exception (#PF)”.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch (execute access).
    pub instruction_fetch: bool, // bit 4

    #[bits(27)]
    __: u32, // reserved / ignored bits
}

impl PageFaultError {
    #[must_use]
    pub const fn for_access(access: Access, present: bool) -> Self {
        Self::new()
            .with_present(present)
            .with_write(access.write)
            .with_user(access.user)
    }

    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if !self.present() {
            "Non-present page (page not mapped)"
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.user() && self.write() {
            "User-mode write to protected page"
        } else if self.user() {
            "User-mode read of supervisor page"
        } else if self.write() {
            "Write access to protected page"
        } else {
            "Read access to protected page"
        }
    }
}

/// A denied translation: the faulting address (what `CR2` would hold) and
/// the error code the CPU would push.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageFault {
    pub address: VirtualAddress,
    pub error: PageFaultError,
}

impl PageFault {
    /// Whether the fault was raised by ring-3 code.
    #[inline]
    #[must_use]
    pub const fn from_user(&self) -> bool {
        self.error.user()
    }
}

impl fmt::Display for PageFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page fault at {} (err={:#x}): {}",
            self.address,
            self.error.into_bits(),
            self.error.explain()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_code_bits() {
        let e = PageFaultError::for_access(Access::USER_WRITE, true);
        assert_eq!(e.into_bits(), 0b111);
        assert_eq!(e.explain(), "User-mode write to protected page");

        let e = PageFaultError::for_access(Access::KERNEL_READ, false);
        assert_eq!(e.into_bits(), 0);
        assert!(e.explain().starts_with("Non-present"));
    }
}
