//! # Interrupt sources
//!
//! The hosted machine has three ways into the kernel:
//!
//! | Vector | Source                   | Handling                                   |
//! |--------|--------------------------|--------------------------------------------|
//! | 14     | Page fault               | [`page_fault`]: kill the process or panic  |
//! | 32     | Timer (PIC IRQ 0)        | [`timer`]: tick, wake sleepers, reschedule |
//! | 0x80   | `int 0x80` syscall gate  | [`crate::syscall`]                         |
//!
//! All three arrive through interrupt gates, so `IF` is clear on entry.

pub mod page_fault;
pub mod timer;

pub use crate::trap_frame::TIMER_VECTOR;

/// The user-callable syscall gate (DPL 3).
pub const SYSCALL_VECTOR: u32 = 0x80;
