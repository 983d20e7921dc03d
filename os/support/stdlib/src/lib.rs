//! # User-side runtime
//!
//! Everything a user program and the kernel have to agree on, split by
//! feature so the kernel pulls in only the contract:
//!
//! * `syscall-abi`: syscall numbers, sentinels, launch flags and the
//!   `MemInfo` record as laid out in user memory.
//! * `syscall`: the trap port ([`SyscallPort`]) a program runs against, the
//!   unwind reasons and the program descriptor.
//! * `stdlib`: ergonomic wrappers ([`Userland`]) and the first-fit heap.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![forbid(unsafe_code)]

#[cfg(feature = "stdlib")]
extern crate alloc;

#[cfg(feature = "syscall-abi")]
pub mod syscall_abi;

#[cfg(feature = "syscall")]
pub mod syscall;

#[cfg(feature = "stdlib")]
pub mod stdlib;

#[cfg(feature = "syscall")]
pub use syscall::{Program, ProgramMain, SyscallPort, Unwind, UserResult};

#[cfg(feature = "stdlib")]
pub use stdlib::{Heap, Userland};

/// The user address-space layout, as seen from ring 3.
#[cfg(feature = "stdlib")]
pub use kernel_info::memory as layout;
