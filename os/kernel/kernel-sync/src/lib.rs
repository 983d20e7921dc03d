//! # Kernel synchronization primitives
//!
//! The kernel runs on one CPU. Shared state is protected by a [`SpinLock`]
//! that is normally taken with interrupts masked ([`SpinLock::lock_irq`]),
//! so the timer handler can never observe a half-finished update.
//!
//! The interrupt-enable flag is an explicit [`InterruptFlag`] value rather
//! than the `EFLAGS.IF` bit, which lets several kernels coexist in one
//! process (one per test, for instance).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{InterruptFlag, IrqGuard, IrqSpinGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
