//! # The simulated CPU
//!
//! One logical processor shared by the boot thread and every process thread.
//! A thread may only execute kernel or user code while it holds the turn
//! token; everybody else is parked in [`Cpu::wait_turn`].
//!
//! ```text
//!   boot ──hand_off(P1)──► P1 ──tick: hand_off(P2)──► P2 ──exit──► boot
//!     ▲                                                │
//!     └───────────── wait_turn(Kernel) ◄───────────────┘
//! ```
//!
//! The timer thread never touches the token. It only latches a pending
//! interrupt (like the PIC's IRR) which the token holder services at its next
//! interrupt window with `IF` set. Several latched ticks collapse into one.

use crate::process::Pid;
use kernel_sync::InterruptFlag;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Upper bound for a single `hlt`; a lost wakeup costs at most this long.
const HLT_SLICE: Duration = Duration::from_millis(50);

/// Who is (or should be) executing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Context {
    /// The kernel's own boot context. It has no PCB.
    Kernel,
    Process(Pid),
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kernel => f.write_str("kernel"),
            Self::Process(pid) => write!(f, "pid {pid}"),
        }
    }
}

/// The machine stopped; nothing will ever run again.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Halted;

struct Turn {
    holder: Context,
    halted: Option<String>,
}

pub struct Cpu {
    turn: Mutex<Turn>,
    wake: Condvar,
    /// The `IF` flag of the single CPU.
    pub interrupts: InterruptFlag,
    timer_pending: AtomicBool,
    cr3: AtomicU32,
    esp0: AtomicU32,
}

impl Cpu {
    /// A CPU owned by the boot context, interrupts disabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            turn: Mutex::new(Turn {
                holder: Context::Kernel,
                halted: None,
            }),
            wake: Condvar::new(),
            interrupts: InterruptFlag::new(false),
            timer_pending: AtomicBool::new(false),
            cr3: AtomicU32::new(0),
            esp0: AtomicU32::new(0),
        }
    }

    fn turn(&self) -> MutexGuard<'_, Turn> {
        self.turn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `me` holds the turn token.
    ///
    /// # Errors
    /// [`Halted`] once the machine has stopped.
    pub fn wait_turn(&self, me: Context) -> Result<(), Halted> {
        let turn = self
            .wake
            .wait_while(self.turn(), |t| t.halted.is_none() && t.holder != me)
            .unwrap_or_else(PoisonError::into_inner);
        if turn.halted.is_some() {
            Err(Halted)
        } else {
            Ok(())
        }
    }

    /// Give the turn token to `to`. The caller must not execute afterwards
    /// until it waits for its own turn again.
    pub fn hand_off(&self, to: Context) {
        let mut turn = self.turn();
        turn.holder = to;
        drop(turn);
        self.wake.notify_all();
    }

    #[must_use]
    pub fn holder(&self) -> Context {
        self.turn().holder
    }

    /// Latch a timer interrupt.
    pub fn raise_timer(&self) {
        self.timer_pending.store(true, Ordering::Release);
        // Taking the lock orders the store before any waiter's predicate check.
        drop(self.turn());
        self.wake.notify_all();
    }

    /// Acknowledge a latched timer interrupt, if any.
    pub fn take_timer(&self) -> bool {
        self.timer_pending.swap(false, Ordering::AcqRel)
    }

    /// `hlt`: sleep until a timer interrupt is pending.
    ///
    /// # Errors
    /// [`Halted`] once the machine has stopped.
    pub fn hlt(&self) -> Result<(), Halted> {
        let (turn, _) = self
            .wake
            .wait_timeout_while(self.turn(), HLT_SLICE, |t| {
                t.halted.is_none() && !self.timer_pending.load(Ordering::Acquire)
            })
            .unwrap_or_else(PoisonError::into_inner);
        if turn.halted.is_some() {
            Err(Halted)
        } else {
            Ok(())
        }
    }

    /// Stop the machine for good and wake every parked thread.
    ///
    /// Only the first reason is kept.
    pub fn halt(&self, reason: impl Into<String>) {
        let mut turn = self.turn();
        if turn.halted.is_none() {
            turn.halted = Some(reason.into());
        }
        drop(turn);
        self.interrupts.disable();
        self.wake.notify_all();
    }

    #[must_use]
    pub fn halted(&self) -> Option<String> {
        self.turn().halted.clone()
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.turn().halted.is_some()
    }

    /// Load a page directory base into `CR3`.
    pub fn load_cr3(&self, directory: u32) {
        self.cr3.store(directory, Ordering::Release);
    }

    #[must_use]
    pub fn cr3(&self) -> u32 {
        self.cr3.load(Ordering::Acquire)
    }

    /// Set the supervisor stack used on the next ring 3 → ring 0 transition.
    pub fn set_esp0(&self, esp0: u32) {
        self.esp0.store(esp0, Ordering::Release);
    }

    #[must_use]
    pub fn esp0(&self) -> u32 {
        self.esp0.load(Ordering::Acquire)
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn the_token_passes_between_threads() {
        let cpu = Arc::new(Cpu::new());
        let child = {
            let cpu = Arc::clone(&cpu);
            thread::spawn(move || {
                cpu.wait_turn(Context::Process(1)).unwrap();
                cpu.hand_off(Context::Kernel);
            })
        };

        cpu.hand_off(Context::Process(1));
        cpu.wait_turn(Context::Kernel).unwrap();
        child.join().unwrap();
        assert_eq!(cpu.holder(), Context::Kernel);
    }

    #[test]
    fn pending_ticks_coalesce() {
        let cpu = Cpu::new();
        cpu.raise_timer();
        cpu.raise_timer();
        assert!(cpu.take_timer());
        assert!(!cpu.take_timer());
    }

    #[test]
    fn halting_releases_waiters() {
        let cpu = Arc::new(Cpu::new());
        let waiter = {
            let cpu = Arc::clone(&cpu);
            thread::spawn(move || cpu.wait_turn(Context::Process(3)))
        };
        cpu.halt("test");
        cpu.halt("ignored");
        assert_eq!(waiter.join().unwrap(), Err(Halted));
        assert_eq!(cpu.halted().as_deref(), Some("test"));
        assert_eq!(cpu.hlt(), Err(Halted));
    }

    #[test]
    fn hlt_returns_once_the_timer_fires() {
        let cpu = Arc::new(Cpu::new());
        let timer = {
            let cpu = Arc::clone(&cpu);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(5));
                cpu.raise_timer();
            })
        };
        while !cpu.take_timer() {
            cpu.hlt().unwrap();
        }
        timer.join().unwrap();
    }
}
