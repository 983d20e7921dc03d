//! # Interrupt frames on the supervisor stack
//!
//! A process that is not running is described entirely by the frame at the
//! top of its supervisor stack: the layout the `int`/`irq` entry stubs build
//! (segment registers, `pusha`, vector and error code) followed by what the
//! CPU pushes on a ring 3 → ring 0 transition.
//!
//! ```text
//!  kernel_stack_top ─►┌──────────┐
//!                     │ ss       │  ┐
//!                     │ useresp  │  │ pushed by the CPU
//!                     │ eflags   │  │
//!                     │ cs       │  │
//!                     │ eip      │  ┘
//!                     │ err_code │  ┐ pushed by the stub
//!                     │ int_no   │  ┘
//!                     │ eax..edi │  pusha (8 words)
//!                     │ ds es    │
//!                     │ fs gs    │
//!    saved_context ─► └──────────┘
//! ```
//!
//! A fresh process gets a synthetic frame that looks like it was preempted
//! by the timer just before its first instruction; resuming it is then no
//! different from resuming any other preempted process.

use bitfield_struct::bitfield;
use kernel_info::memory::{PROG_ENTRY, USER_STACK_TOP};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// Ring 0 code segment (GDT index 1).
pub const KERNEL_CS: u32 = selector(1, 0);
/// Ring 0 data segment (GDT index 2).
pub const KERNEL_DS: u32 = selector(2, 0);
/// Ring 3 code segment (GDT index 3, RPL 3).
pub const USER_CS: u32 = selector(3, 3);
/// Ring 3 data segment (GDT index 4, RPL 3).
pub const USER_DS: u32 = selector(4, 3);

#[allow(clippy::cast_lossless)]
const fn selector(index: u16, rpl: u8) -> u32 {
    Selector::new().with_index(index).with_rpl(rpl).into_bits() as u32
}

/// Vector of the programmable interval timer after PIC remapping.
pub const TIMER_VECTOR: u32 = 32;

/// Number of 32-bit words in an [`InterruptFrame`].
pub const FRAME_WORDS: usize = 19;

/// Bytes occupied by an [`InterruptFrame`] on the supervisor stack.
#[allow(clippy::cast_possible_truncation)]
pub const FRAME_BYTES: u32 = (FRAME_WORDS * 4) as u32;

const _: () = {
    assert!(KERNEL_CS == 0x08);
    assert!(KERNEL_DS == 0x10);
    assert!(USER_CS == 0x1B);
    assert!(USER_DS == 0x23);
};

/// Raw 16-bit selector encoding.
///
/// ```text
///  15            3 2  1  0
/// +----------------+--+----+
/// |   Index[12:0]  |TI| RPL|
/// +----------------+--+----+
/// ```
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct Selector {
    #[bits(2)]
    pub rpl: u8,
    /// 0 = GDT, 1 = LDT.
    pub ldt: bool,
    #[bits(13)]
    pub index: u16,
}

/// The `EFLAGS` register.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Eflags {
    pub carry: bool,
    /// Bit 1 always reads as one.
    #[bits(1, default = true)]
    pub reserved_one: bool,
    pub parity: bool,
    __res3: bool,
    pub adjust: bool,
    __res5: bool,
    pub zero: bool,
    pub sign: bool,
    pub trap: bool,
    /// `IF`: maskable interrupts are delivered.
    pub interrupt_enable: bool,
    pub direction: bool,
    pub overflow: bool,
    #[bits(2)]
    pub iopl: u8,
    #[bits(18)]
    __res14_31: u32,
}

impl Eflags {
    /// The value a user program starts with: `IF` set, `IOPL = 0`.
    #[must_use]
    pub const fn user_default() -> Self {
        Self::new().with_interrupt_enable(true)
    }
}

/// Register file saved on the supervisor stack by an interrupt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InterruptFrame {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// `esp` as saved by `pusha`; ignored by `popa`.
    pub esp_dummy: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub int_no: u32,
    pub err_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: Eflags,
    pub useresp: u32,
    pub ss: u32,
}

impl InterruptFrame {
    /// The frame of a process that has not run yet.
    #[must_use]
    pub const fn first_entry() -> Self {
        Self {
            gs: USER_DS,
            fs: USER_DS,
            es: USER_DS,
            ds: USER_DS,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp_dummy: 0,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            int_no: TIMER_VECTOR,
            err_code: 0,
            eip: PROG_ENTRY,
            cs: USER_CS,
            eflags: Eflags::user_default(),
            useresp: USER_STACK_TOP,
            ss: USER_DS,
        }
    }

    /// Where the frame starts for a supervisor stack ending at `stack_top`.
    #[must_use]
    pub const fn address_below(stack_top: PhysicalAddress) -> PhysicalAddress {
        PhysicalAddress::new(stack_top.as_u32() - FRAME_BYTES)
    }

    /// Whether the frame returns to ring 3.
    #[must_use]
    pub const fn returns_to_user(&self) -> bool {
        self.cs & 3 == 3
    }

    #[must_use]
    pub const fn to_words(&self) -> [u32; FRAME_WORDS] {
        [
            self.gs,
            self.fs,
            self.es,
            self.ds,
            self.edi,
            self.esi,
            self.ebp,
            self.esp_dummy,
            self.ebx,
            self.edx,
            self.ecx,
            self.eax,
            self.int_no,
            self.err_code,
            self.eip,
            self.cs,
            self.eflags.into_bits(),
            self.useresp,
            self.ss,
        ]
    }

    #[must_use]
    pub const fn from_words(w: &[u32; FRAME_WORDS]) -> Self {
        Self {
            gs: w[0],
            fs: w[1],
            es: w[2],
            ds: w[3],
            edi: w[4],
            esi: w[5],
            ebp: w[6],
            esp_dummy: w[7],
            ebx: w[8],
            edx: w[9],
            ecx: w[10],
            eax: w[11],
            int_no: w[12],
            err_code: w[13],
            eip: w[14],
            cs: w[15],
            eflags: Eflags::from_bits(w[16]),
            useresp: w[17],
            ss: w[18],
        }
    }

    /// Store the frame at `at` (the lowest address).
    pub fn write_to<M: PhysMapper + ?Sized>(&self, mem: &mut M, at: PhysicalAddress) {
        let mut raw = [0u8; FRAME_WORDS * 4];
        for (chunk, word) in raw.chunks_exact_mut(4).zip(self.to_words()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        mem.write(at, &raw);
    }

    /// Load the frame stored at `at`.
    pub fn read_from<M: PhysMapper + ?Sized>(mem: &M, at: PhysicalAddress) -> Self {
        let mut raw = [0u8; FRAME_WORDS * 4];
        mem.read(at, &mut raw);
        let mut words = [0u32; FRAME_WORDS];
        for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self::from_words(&words)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel_alloc::SparsePhysMemory;

    #[test]
    fn first_entry_frame_matches_a_fresh_user_process() {
        let f = InterruptFrame::first_entry();
        assert_eq!(f.eflags.into_bits(), 0x202);
        assert_eq!(f.cs, 0x1B);
        assert_eq!(f.ss, 0x23);
        assert_eq!(f.int_no, 32);
        assert_eq!(f.eip, PROG_ENTRY);
        assert_eq!(f.useresp, USER_STACK_TOP);
        assert!(f.returns_to_user());
    }

    #[test]
    fn frames_sit_at_the_top_of_the_supervisor_stack() {
        let mut mem = SparsePhysMemory::new(PhysicalAddress::new(0x0080_0000));
        let top = PhysicalAddress::new(0x0020_1000);
        let at = InterruptFrame::address_below(top);
        assert_eq!(at.as_u32(), 0x0020_1000 - 76);

        let mut frame = InterruptFrame::first_entry();
        frame.useresp = 0x007F_FF00;
        frame.write_to(&mut mem, at);

        // ss is the last word below the stack top.
        assert_eq!(mem.read_u32(PhysicalAddress::new(top.as_u32() - 4)), USER_DS);
        assert_eq!(InterruptFrame::read_from(&mem, at), frame);
    }
}
