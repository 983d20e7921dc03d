//! The trap port a user program runs against.
//!
//! A program never sees the kernel directly. Every memory access and every
//! `int 0x80` goes through a [`SyscallPort`]; on the hosted machine that is
//! also where the CPU notices a pending timer interrupt and where a page
//! fault is raised.

use crate::syscall_abi::Sysno;
use thiserror::Error;

/// Why a program stopped running before reaching the end of `main`.
///
/// Returned by port operations; programs propagate it with `?` so the stack
/// unwinds back to the entry point.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum Unwind {
    #[error("exited with status {0}")]
    Exited(i32),
    #[error("segmentation fault")]
    Faulted,
    #[error("machine halted")]
    Halted,
}

pub type UserResult<T> = Result<T, Unwind>;

/// Ring-3 view of the machine.
pub trait SyscallPort {
    /// `int 0x80` with `eax = number`; returns the new `eax`.
    ///
    /// # Errors
    /// [`Unwind`] if the call does not return to the caller.
    fn trap(&mut self, number: u32, ebx: u32, ecx: u32, edx: u32) -> UserResult<u32>;

    /// Read `buf.len()` bytes of the caller's memory at `va`.
    ///
    /// # Errors
    /// [`Unwind::Faulted`] if any byte is not user-readable.
    fn load(&mut self, va: u32, buf: &mut [u8]) -> UserResult<()>;

    /// Write `data` to the caller's memory at `va`.
    ///
    /// # Errors
    /// [`Unwind::Faulted`] if any byte is not user-writable.
    fn store(&mut self, va: u32, data: &[u8]) -> UserResult<()>;

    /// Current `esp`.
    fn stack_pointer(&self) -> u32;

    fn set_stack_pointer(&mut self, esp: u32);

    /// Trap with a known syscall number.
    ///
    /// # Errors
    /// See [`SyscallPort::trap`].
    fn syscall(&mut self, sysno: Sysno, ebx: u32, ecx: u32, edx: u32) -> UserResult<u32> {
        self.trap(sysno as u32, ebx, ecx, edx)
    }

    /// # Errors
    /// See [`SyscallPort::load`].
    fn load_u32(&mut self, va: u32) -> UserResult<u32> {
        let mut raw = [0u8; 4];
        self.load(va, &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// # Errors
    /// See [`SyscallPort::store`].
    fn store_u32(&mut self, va: u32, value: u32) -> UserResult<()> {
        self.store(va, &value.to_le_bytes())
    }
}

/// Entry point of a user program. `Ok(code)` is an implicit `exit(code)`.
pub type ProgramMain = fn(&mut dyn SyscallPort) -> UserResult<i32>;

/// A program that can be packed into an executable image.
#[derive(Copy, Clone)]
pub struct Program {
    /// Name used to launch it; also the entry symbol.
    pub name: &'static str,
    pub main: ProgramMain,
    /// Initialized data placed right after the image header.
    pub data: &'static [u8],
}

impl core::fmt::Debug for Program {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("data", &self.data.len())
            .finish_non_exhaustive()
    }
}
