//! # Kernel
//!
//! The process and memory core of a single-CPU, 32-bit protected-mode
//! kernel, running hosted: physical memory is a sparse byte store, page
//! tables are real two-level x86 tables inside it, and every process is a
//! host thread that may only execute while it holds the CPU's turn token.
//!
//! ## Architecture Overview
//!
//! ```text
//!   Kernel::run("sh")                    ┌──────────── timer thread (PIT)
//!         │                              │ raise_timer every tick
//!         ▼                              ▼
//!  ┌─────────────┐  create   ┌──────────────────────┐
//!  │ boot context│──────────►│ process table (PCBs) │◄── scheduler::on_tick
//!  └─────┬───────┘           └──────────┬───────────┘
//!        │ run_foreground               │ admit / destroy
//!        ▼                              ▼
//!  ┌─────────────┐  int 0x80 ┌──────────────────────┐
//!  │ UserContext │──────────►│ syscall::dispatch    │
//!  │ (ring 3)    │  #PF      │ page_fault::handle   │
//!  └─────────────┘           └──────────┬───────────┘
//!                                       ▼
//!                  KernelState: frames, physical memory, ticks
//!                  (one SpinLock, always taken with IF masked)
//! ```
//!
//! ## Core Components
//!
//! * [`cpu`]: the turn token, the `IF` flag, `CR3`/`ESP0` and `hlt`
//! * [`process`]: PCBs, the fixed-size table, creation and destruction
//! * [`scheduler`]: round-robin choice on every serviced tick
//! * [`userland`]: the ring 3 port, foreground launches and termination
//! * [`syscall`]: the `int 0x80` dispatcher
//! * [`interrupts`]: timer and page-fault handlers
//! * [`devices`]: program storage and console collaborators
//! * [`image`]: the executable image format
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kernel::{BufferConsole, Kernel};
//!
//! let console = BufferConsole::new();
//! let kernel = Kernel::builder()
//!     .programs(programs::ALL)
//!     .console(console.clone())
//!     .boot()?;
//! let status = kernel.run("hello", "")?;
//! assert_eq!(status.code(), 0);
//! ```

pub mod config;
pub mod cpu;
pub mod devices;
pub mod image;
pub mod interrupts;
pub mod panic;
pub mod process;
pub mod scheduler;
pub mod state;
pub mod syscall;
pub mod trap_frame;
pub mod userland;

pub use config::KernelConfig;
pub use cpu::Context;
pub use devices::{BufferConsole, Console, MemoryStore, ProgramStore};
pub use process::{ExitStatus, LaunchError, LaunchMode, Pid, ProcState};

use crate::cpu::{Cpu, Halted};
use crate::image::{EntryTable, ImageError};
use crate::interrupts::timer::Timer;
use crate::state::KernelState;
use kernel_alloc::FrameStats;
use kernel_sync::SpinLock;
use log::info;
use std::sync::{Arc, Mutex, PoisonError};
use stdlib::Program;
use stdlib::syscall_abi::MemInfo;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid configuration: {0}")]
    Config(&'static str),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error("launch failed: {0}")]
    Launch(#[from] LaunchError),
    #[error("could not start the timer: {0}")]
    Timer(#[from] std::io::Error),
    #[error("machine halted: {0}")]
    Halted(String),
}

/// Everything the boot context, process threads and the timer share.
pub(crate) struct Shared {
    pub(crate) config: KernelConfig,
    pub(crate) cpu: Cpu,
    pub(crate) state: SpinLock<KernelState>,
    pub(crate) store: SpinLock<Box<dyn ProgramStore>>,
    pub(crate) console: SpinLock<Box<dyn Console>>,
    pub(crate) entries: EntryTable,
}

/// A booted machine.
///
/// The thread calling [`Kernel::run`] acts as the boot context. Dropping the
/// kernel halts it and stops the timer.
pub struct Kernel {
    shared: Arc<Shared>,
    timer: Mutex<Option<Timer>>,
    boot: Mutex<()>,
}

pub struct KernelBuilder {
    config: KernelConfig,
    programs: Vec<Program>,
    store: Option<Box<dyn ProgramStore>>,
    console: Option<Box<dyn Console>>,
}

impl KernelBuilder {
    #[must_use]
    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Make `programs` launchable. Without an explicit store they are also
    /// installed as images in a fresh [`MemoryStore`].
    #[must_use]
    pub fn programs(mut self, programs: &[Program]) -> Self {
        self.programs.extend_from_slice(programs);
        self
    }

    #[must_use]
    pub fn store(mut self, store: impl ProgramStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Defaults to a [`BufferConsole`] nobody reads.
    #[must_use]
    pub fn console(mut self, console: impl Console + 'static) -> Self {
        self.console = Some(Box::new(console));
        self
    }

    /// Build the kernel tables and start the timer.
    ///
    /// # Errors
    /// An invalid configuration, a program that cannot be packed into an
    /// image, or a timer thread that fails to start.
    pub fn boot(self) -> Result<Kernel, KernelError> {
        if let Some(problem) = self.config.problem() {
            return Err(KernelError::Config(problem));
        }

        let mut entries = EntryTable::new();
        for program in &self.programs {
            entries.insert(program);
        }
        let store = match self.store {
            Some(store) => store,
            None => {
                let mut store = MemoryStore::new();
                for program in &self.programs {
                    store.install(program)?;
                }
                Box::new(store)
            }
        };
        let console = self
            .console
            .unwrap_or_else(|| Box::new(BufferConsole::new()));

        let state = KernelState::new(&self.config);
        let stats = state.frames.stats();
        let cpu = Cpu::new();
        cpu.load_cr3(state.boot_directory.frame().base().as_u32());

        let shared = Arc::new(Shared {
            config: self.config,
            cpu,
            state: SpinLock::new(state),
            store: SpinLock::new(store),
            console: SpinLock::new(console),
            entries,
        });

        let timer = {
            let shared = Arc::clone(&shared);
            Timer::start(shared.config.tick_period, move || {
                if shared.cpu.is_halted() {
                    return false;
                }
                shared.cpu.raise_timer();
                true
            })?
        };

        info!(
            "booted: {} managed frames, {} process slots, {} programs, tick {:?}",
            stats.total,
            shared.config.max_procs,
            shared.entries.len(),
            shared.config.tick_period
        );
        Ok(Kernel {
            shared,
            timer: Mutex::new(Some(timer)),
            boot: Mutex::new(()),
        })
    }
}

impl Kernel {
    #[must_use]
    pub fn builder() -> KernelBuilder {
        KernelBuilder {
            config: KernelConfig::default(),
            programs: Vec::new(),
            store: None,
            console: None,
        }
    }

    /// Launch `name` in the foreground from the boot context and block
    /// until it terminates.
    ///
    /// # Errors
    /// [`KernelError::Launch`] if the program cannot be started,
    /// [`KernelError::Halted`] if the machine is or becomes halted.
    pub fn run(&self, name: &str, args: &str) -> Result<ExitStatus, KernelError> {
        let _boot = self.boot.lock().unwrap_or_else(PoisonError::into_inner);
        self.check_running()?;

        let pid = self
            .shared
            .create(name, args.as_bytes(), LaunchMode::Foreground, Context::Kernel)?;
        userland::run_foreground(&self.shared, Context::Kernel, pid).map_err(|Halted| self.halted_error())
    }

    fn check_running(&self) -> Result<(), KernelError> {
        match self.shared.cpu.halted() {
            Some(reason) => Err(KernelError::Halted(reason)),
            None => Ok(()),
        }
    }

    fn halted_error(&self) -> KernelError {
        KernelError::Halted(self.shared.cpu.halted().unwrap_or_default())
    }

    /// Destroy background processes that have terminated and been switched
    /// out. Returns how many were reaped.
    pub fn reap_zombies(&self) -> usize {
        self.with_state(KernelState::reap_zombies)
    }

    #[must_use]
    pub fn mem_info(&self) -> MemInfo {
        self.with_state(|s| s.mem_info())
    }

    #[must_use]
    pub fn frame_stats(&self) -> FrameStats {
        self.with_state(|s| s.frames.stats())
    }

    #[must_use]
    pub fn process_state(&self, pid: Pid) -> ProcState {
        self.with_state(|s| s.procs.state(pid))
    }

    /// Serviced timer ticks since boot.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.with_state(|s| s.ticks)
    }

    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.shared.config
    }

    /// The halt reason, once the machine has stopped.
    #[must_use]
    pub fn halted(&self) -> Option<String> {
        self.shared.cpu.halted()
    }

    /// A handle that can halt the machine from any thread, for example while
    /// another thread is blocked in [`Kernel::run`].
    #[must_use]
    pub fn halt_handle(&self) -> HaltHandle {
        HaltHandle(Arc::clone(&self.shared))
    }

    /// Halt the machine and stop the timer. Blocked process threads unwind.
    pub fn shutdown(&self) {
        self.shared.cpu.halt("shutdown");
        if let Some(mut timer) = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            timer.stop();
        }
    }

    /// Host-side access: the calling thread is not the CPU, so `IF` is left
    /// alone.
    fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        let mut state = self.shared.state.lock();
        f(&mut *state)
    }
}

#[derive(Clone)]
pub struct HaltHandle(Arc<Shared>);

impl HaltHandle {
    /// Stop the machine; a pending [`Kernel::run`] returns
    /// [`KernelError::Halted`] with `reason`.
    pub fn halt(&self, reason: &str) {
        self.0.cpu.halt(reason);
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        self.shutdown();
    }
}
