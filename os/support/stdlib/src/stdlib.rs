//! Convenience layer over the raw trap port.
//!
//! Strings handed to the kernel are copied onto the user stack first, the
//! way a C program would pass a pointer to a local buffer; the stack pointer
//! is restored once the call returns.

use crate::syscall::{SyscallPort, Unwind, UserResult};
use crate::syscall_abi::{EXEC_BACKGROUND, FAILURE, MemInfo, STDOUT, Sysno};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use kernel_info::memory::{ARGS_BASE, ARGS_MAX, PROG_ENTRY};

/// Largest slice passed to a single `Write` trap.
const WRITE_CHUNK: usize = 256;

#[allow(clippy::cast_possible_truncation)]
const MEMINFO_SIZE: u32 = MemInfo::SIZE as u32;

/// Syscall wrappers available on every [`SyscallPort`].
pub trait Userland: SyscallPort {
    /// Write `bytes` to descriptor `fd`.
    ///
    /// Returns the number of bytes written, or `None` if the kernel refused
    /// (unknown descriptor).
    ///
    /// # Errors
    /// [`Unwind`] if the process stops while writing.
    fn write(&mut self, fd: u32, bytes: &[u8]) -> UserResult<Option<u32>> {
        let mut written = 0u32;
        for chunk in bytes.chunks(WRITE_CHUNK) {
            let esp = self.stack_pointer();
            let va = push_bytes(self, chunk)?;
            let n = self.syscall(Sysno::Write, fd, va, len_u32(chunk))?;
            self.set_stack_pointer(esp);
            if n == FAILURE {
                return Ok(None);
            }
            written += n;
        }
        Ok(Some(written))
    }

    /// Write `text` to standard output.
    ///
    /// # Errors
    /// [`Unwind`] if the process stops while writing.
    fn print(&mut self, text: &str) -> UserResult<()> {
        self.write(STDOUT, text.as_bytes()).map(drop)
    }

    /// Terminate with `code`. Returns the reason to propagate.
    #[allow(clippy::cast_sign_loss)]
    fn exit(&mut self, code: i32) -> Unwind {
        match self.syscall(Sysno::Exit, code as u32, 0, 0) {
            Err(unwind) => unwind,
            Ok(_) => Unwind::Exited(code),
        }
    }

    /// Move the heap break by `increment` bytes; `None` if the kernel refused.
    ///
    /// # Errors
    /// [`Unwind`] if the process stops during the call.
    fn sbrk(&mut self, increment: i32) -> UserResult<Option<u32>> {
        #[allow(clippy::cast_sign_loss)]
        let old = self.syscall(Sysno::Sbrk, increment as u32, 0, 0)?;
        Ok((old != FAILURE).then_some(old))
    }

    /// Sleep for at least `ms` milliseconds; returns the kernel's result (0).
    ///
    /// # Errors
    /// [`Unwind`] if the process stops while asleep.
    fn sleep(&mut self, ms: u32) -> UserResult<u32> {
        self.syscall(Sysno::Sleep, ms, 0, 0)
    }

    /// Run `name` in the foreground and wait for it.
    ///
    /// Returns the child's exit code, or -1 if it could not be started.
    ///
    /// # Errors
    /// [`Unwind`] if the caller stops while waiting.
    fn exec(&mut self, name: &str, args: &str) -> UserResult<i32> {
        let status = launch(self, name, args, 0)?;
        Ok(i32::from_ne_bytes(status.to_ne_bytes()))
    }

    /// Start `name` in the background; returns its pid.
    ///
    /// # Errors
    /// [`Unwind`] if the caller stops during the call.
    fn spawn(&mut self, name: &str, args: &str) -> UserResult<Option<u32>> {
        let pid = launch(self, name, args, EXEC_BACKGROUND)?;
        Ok((pid != FAILURE).then_some(pid))
    }

    /// # Errors
    /// [`Unwind`] if the process stops during the call.
    fn meminfo(&mut self) -> UserResult<Option<MemInfo>> {
        let esp = self.stack_pointer();
        let va = esp.checked_sub(MEMINFO_SIZE).ok_or(Unwind::Faulted)? & !3;
        self.set_stack_pointer(va);

        let result = self.syscall(Sysno::MemInfo, va, 0, 0)?;
        let mut raw = [0u8; MemInfo::SIZE];
        self.load(va, &mut raw)?;
        self.set_stack_pointer(esp);

        Ok((result != FAILURE).then(|| MemInfo::from_bytes(&raw)))
    }

    /// Bring the whole machine down with `message`.
    fn kernel_panic(&mut self, message: &str) -> Unwind {
        let va = match push_bytes(self, message.as_bytes()) {
            Ok(va) => va,
            Err(unwind) => return unwind,
        };
        match self.syscall(Sysno::Panic, va, 0, 0) {
            Err(unwind) => unwind,
            Ok(_) => Unwind::Halted,
        }
    }

    /// Block until a key arrives.
    ///
    /// # Errors
    /// [`Unwind`] if the process stops while waiting.
    fn get_char(&mut self) -> UserResult<u8> {
        let c = self.syscall(Sysno::GetChar, 0, 0, 0)?;
        Ok(c.to_le_bytes()[0])
    }

    /// # Errors
    /// [`Unwind`] if the process stops during the call.
    fn get_char_nonblock(&mut self) -> UserResult<Option<u8>> {
        let c = self.syscall(Sysno::GetCharNonblock, 0, 0, 0)?.to_le_bytes()[0];
        Ok((c != 0).then_some(c))
    }

    /// Timer ticks since boot.
    ///
    /// # Errors
    /// [`Unwind`] if the process stops during the call.
    fn uptime(&mut self) -> UserResult<u32> {
        self.syscall(Sysno::Uptime, 0, 0, 0)
    }

    /// The argument string the process was launched with.
    ///
    /// # Errors
    /// [`Unwind`] if the argument page is not readable.
    fn args(&mut self) -> UserResult<String> {
        let mut raw = vec![0u8; ARGS_MAX as usize];
        self.load(ARGS_BASE, &mut raw)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    /// `len` bytes of the program's initialized data, starting `offset`
    /// bytes after the entry point.
    ///
    /// # Errors
    /// [`Unwind::Faulted`] if the range leaves the image window.
    fn image_data(&mut self, offset: u32, len: usize) -> UserResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.load(PROG_ENTRY + offset, &mut buf)?;
        Ok(buf)
    }
}

impl<P: SyscallPort + ?Sized> Userland for P {}

fn launch<P: SyscallPort + ?Sized>(sys: &mut P, name: &str, args: &str, flags: u32) -> UserResult<u32> {
    let esp = sys.stack_pointer();
    let name_va = push_bytes(sys, name.as_bytes())?;
    let args_va = push_bytes(sys, args.as_bytes())?;
    let result = sys.syscall(Sysno::Exec, name_va, args_va, flags)?;
    sys.set_stack_pointer(esp);
    Ok(result)
}

/// Copy `bytes` and a terminating NUL onto the user stack; returns their
/// address, which is also the new stack pointer.
fn push_bytes<P: SyscallPort + ?Sized>(sys: &mut P, bytes: &[u8]) -> UserResult<u32> {
    let size = u32::try_from(bytes.len() + 1).map_err(|_| Unwind::Faulted)?;
    let va = sys
        .stack_pointer()
        .checked_sub(size)
        .ok_or(Unwind::Faulted)?
        & !3;
    sys.store(va, bytes)?;
    sys.store(va + size - 1, &[0])?;
    sys.set_stack_pointer(va);
    Ok(va)
}

#[allow(clippy::cast_possible_truncation)]
const fn len_u32(bytes: &[u8]) -> u32 {
    bytes.len() as u32
}

/// Size of the header in front of every heap block.
pub const BLOCK_HEADER: u32 = 12;

/// Smallest payload worth splitting off into its own block.
const MIN_SPLIT: u32 = 4;

/// First-fit heap allocator over `sbrk`.
///
/// Blocks live in user memory as `{ size, free, next }` words followed by
/// the payload; `next == 0` ends the list. New blocks are carved from the
/// break only when no free block fits, and freed blocks coalesce forward.
#[derive(Debug, Default)]
pub struct Heap {
    head: Option<u32>,
}

#[derive(Debug, Copy, Clone)]
struct Block {
    size: u32,
    free: bool,
    next: Option<u32>,
}

impl Block {
    fn read<P: SyscallPort + ?Sized>(sys: &mut P, at: u32) -> UserResult<Self> {
        Ok(Self {
            size: sys.load_u32(at)?,
            free: sys.load_u32(at + 4)? != 0,
            next: Some(sys.load_u32(at + 8)?).filter(|&n| n != 0),
        })
    }

    fn write<P: SyscallPort + ?Sized>(&self, sys: &mut P, at: u32) -> UserResult<()> {
        sys.store_u32(at, self.size)?;
        sys.store_u32(at + 4, u32::from(self.free))?;
        sys.store_u32(at + 8, self.next.unwrap_or(0))
    }
}

impl Heap {
    #[must_use]
    pub const fn new() -> Self {
        Self { head: None }
    }

    /// Allocate `size` bytes; returns the payload address or `None` when the
    /// heap cannot grow any further.
    ///
    /// # Errors
    /// [`Unwind`] if the process stops (for example on a corrupted list).
    pub fn malloc<P: SyscallPort + ?Sized>(&mut self, sys: &mut P, size: u32) -> UserResult<Option<u32>> {
        let Some(size) = size.checked_add(3).map(|s| s & !3).filter(|&s| s != 0) else {
            return Ok(None);
        };

        let mut cursor = self.head;
        let mut last = None;
        while let Some(at) = cursor {
            let mut block = Block::read(sys, at)?;
            if block.free && block.size >= size {
                if block.size >= size + BLOCK_HEADER + MIN_SPLIT {
                    let tail_at = at + BLOCK_HEADER + size;
                    Block {
                        size: block.size - size - BLOCK_HEADER,
                        free: true,
                        next: block.next,
                    }
                    .write(sys, tail_at)?;
                    block.next = Some(tail_at);
                    block.size = size;
                }
                block.free = false;
                block.write(sys, at)?;
                return Ok(Some(at + BLOCK_HEADER));
            }
            last = Some(at);
            cursor = block.next;
        }

        let Some(increment) = size
            .checked_add(BLOCK_HEADER)
            .and_then(|n| i32::try_from(n).ok())
        else {
            return Ok(None);
        };
        let Some(at) = sys.sbrk(increment)? else {
            return Ok(None);
        };

        Block {
            size,
            free: false,
            next: None,
        }
        .write(sys, at)?;
        match last {
            None => self.head = Some(at),
            Some(prev) => {
                let mut tail = Block::read(sys, prev)?;
                tail.next = Some(at);
                tail.write(sys, prev)?;
            }
        }
        Ok(Some(at + BLOCK_HEADER))
    }

    /// Return the block at `ptr` and merge it with free successors.
    ///
    /// # Errors
    /// [`Unwind`] if the process stops (for example on a wild pointer).
    pub fn free<P: SyscallPort + ?Sized>(&mut self, sys: &mut P, ptr: u32) -> UserResult<()> {
        if ptr < BLOCK_HEADER {
            return Ok(());
        }
        let at = ptr - BLOCK_HEADER;
        let mut block = Block::read(sys, at)?;
        block.free = true;
        while let Some(next_at) = block.next {
            let next = Block::read(sys, next_at)?;
            if !next.free {
                break;
            }
            block.size += BLOCK_HEADER + next.size;
            block.next = next.next;
        }
        block.write(sys, at)
    }
}
