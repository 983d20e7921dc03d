//! # Process table and lifecycle
//!
//! ```text
//!            create            tick / fold back
//!  Unused ──────────► Ready ◄───────────────────► Running ──► Zombie ──► Unused
//!                       ▲                          │  │   exit/fault   reap/destroy
//!                       │ deadline reached         │  │
//!                       └──────── Sleeping ◄───────┘  │ foreground launch
//!                                                     ▼
//!                                   Waiting ── child exits ──► Running
//! ```
//!
//! A slot index is the pid. Slots are recycled as soon as a process has been
//! destroyed, so pids repeat.

use crate::Shared;
use crate::cpu::Context;
use crate::image::{self, ImageError};
use crate::state::KernelState;
use crate::trap_frame::InterruptFrame;
use crate::userland;
use kernel_info::memory::{FAULT_EXIT_CODE, HEAP_BASE, PROG_MAX_SIZE};
use kernel_info::sched::NAME_MAX;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::{AddressSpace, AddressSpaceError};
use log::debug;
use std::sync::Arc;
use std::thread;
use thiserror::Error;

/// Index of a process table slot.
pub type Pid = usize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ProcState {
    Unused,
    Ready,
    Running,
    Sleeping,
    /// Blocked until a foreground child terminates.
    Waiting,
    /// Terminated; holds its exit status until destroyed.
    Zombie,
}

/// How a process ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Exited(i32),
    /// Killed by a privilege violation.
    Faulted,
}

impl ExitStatus {
    /// The value a launching program sees.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Faulted => FAULT_EXIT_CODE,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LaunchMode {
    /// The launcher blocks until the child terminates.
    Foreground,
    /// The launcher gets the pid back immediately.
    Background,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("program name {0:?} is empty or too long")]
    InvalidName(String),
    #[error("no program image named {0:?}")]
    NotFound(String),
    #[error("malformed image: {0}")]
    BadImage(#[from] ImageError),
    #[error("unknown entry symbol {0:?}")]
    UnknownEntry(String),
    #[error("process table is full")]
    NoFreeSlot,
    #[error(transparent)]
    AddressSpace(#[from] AddressSpaceError),
    #[error("could not start the process thread: {0}")]
    Spawn(String),
}

/// Process control block.
#[derive(Debug)]
pub struct Pcb {
    pub pid: Pid,
    pub state: ProcState,
    /// Program name, for diagnostics.
    pub name: String,
    pub space: Option<AddressSpace>,
    /// First byte past the heap.
    pub heap_break: u32,
    /// Where the interrupted register file lives on the supervisor stack.
    pub saved_context: PhysicalAddress,
    pub exit: Option<ExitStatus>,
    /// Tick at which a sleeping process becomes runnable again.
    pub deadline: u64,
    pub foreground: bool,
    pub parent: Context,
}

impl Pcb {
    const fn unused(pid: Pid) -> Self {
        Self {
            pid,
            state: ProcState::Unused,
            name: String::new(),
            space: None,
            heap_break: HEAP_BASE,
            saved_context: PhysicalAddress::zero(),
            exit: None,
            deadline: 0,
            foreground: false,
            parent: Context::Kernel,
        }
    }

    /// Neither free nor terminated.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        !matches!(self.state, ProcState::Unused | ProcState::Zombie)
    }
}

/// Fixed-capacity table of process slots plus the current pointer.
#[derive(Debug)]
pub struct ProcessTable {
    slots: Vec<Pcb>,
    /// The process owning the CPU; `None` while the boot context runs.
    pub current: Option<Pid>,
}

impl ProcessTable {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(Pcb::unused).collect(),
            current: None,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Pcb> {
        self.slots.get(pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Pcb> {
        self.slots.get_mut(pid)
    }

    #[must_use]
    pub fn state(&self, pid: Pid) -> ProcState {
        self.get(pid).map_or(ProcState::Unused, |p| p.state)
    }

    pub fn set_state(&mut self, pid: Pid, state: ProcState) {
        if let Some(p) = self.get_mut(pid) {
            p.state = state;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pcb> {
        self.slots.iter_mut()
    }

    /// Lowest unused slot.
    #[must_use]
    pub fn free_slot(&self) -> Option<Pid> {
        self.slots.iter().position(|p| p.state == ProcState::Unused)
    }

    /// Processes that are neither unused nor zombies.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|p| p.is_live()).count()
    }

    /// Background zombies whose thread has given up the CPU for good.
    #[must_use]
    pub fn zombies_to_reap(&self) -> Vec<Pid> {
        self.slots
            .iter()
            .filter(|p| p.state == ProcState::Zombie && !p.foreground && self.current != Some(p.pid))
            .map(|p| p.pid)
            .collect()
    }

    /// Return a slot to `Unused`, handing back its address space.
    pub fn release(&mut self, pid: Pid) -> Option<AddressSpace> {
        let slot = self.slots.get_mut(pid)?;
        let space = slot.space.take();
        *slot = Pcb::unused(pid);
        if self.current == Some(pid) {
            self.current = None;
        }
        space
    }
}

impl KernelState {
    /// Put a new process into a free slot: build its address space, prime
    /// its supervisor stack and mark it `Ready`.
    ///
    /// Nothing is left behind on failure.
    ///
    /// # Errors
    /// [`LaunchError::NoFreeSlot`] or a failed address-space build.
    pub fn admit(
        &mut self,
        name: &str,
        image: &[u8],
        args: &[u8],
        mode: LaunchMode,
        parent: Context,
    ) -> Result<Pid, LaunchError> {
        let pid = self.procs.free_slot().ok_or(LaunchError::NoFreeSlot)?;
        let space = AddressSpace::build(
            &mut self.frames,
            &mut self.memory,
            self.kernel_table,
            image,
            args,
        )?;

        let frame_at = InterruptFrame::address_below(space.kernel_stack_top());
        InterruptFrame::first_entry().write_to(&mut self.memory, frame_at);

        let pcb = self
            .procs
            .get_mut(pid)
            .ok_or(LaunchError::NoFreeSlot)?;
        *pcb = Pcb {
            pid,
            state: ProcState::Ready,
            name: name.to_owned(),
            space: Some(space),
            heap_break: HEAP_BASE,
            saved_context: frame_at,
            exit: None,
            deadline: 0,
            foreground: mode == LaunchMode::Foreground,
            parent,
        };
        Ok(pid)
    }

    /// Tear down `pid`'s address space and free its slot.
    pub fn destroy(&mut self, pid: Pid) {
        if let Some(space) = self.procs.release(pid) {
            space.teardown(&mut self.frames, &self.memory);
        }
        debug!("destroyed pid {pid}");
    }

    /// Destroy every background zombie that is not the current process.
    pub fn reap_zombies(&mut self) -> usize {
        let zombies = self.procs.zombies_to_reap();
        for &pid in &zombies {
            self.destroy(pid);
        }
        zombies.len()
    }
}

impl Shared {
    /// Load, validate and start the program `name`.
    ///
    /// The process starts out `Ready`; a foreground launcher then hands it
    /// the CPU, a background one leaves it to the scheduler.
    ///
    /// # Errors
    /// See [`LaunchError`]. The frame allocator and process table are
    /// unchanged on failure.
    pub(crate) fn create(
        self: &Arc<Self>,
        name: &str,
        args: &[u8],
        mode: LaunchMode,
        parent: Context,
    ) -> Result<Pid, LaunchError> {
        if name.is_empty() || name.len() >= NAME_MAX as usize {
            return Err(LaunchError::InvalidName(name.to_owned()));
        }

        let mut buf = vec![0u8; PROG_MAX_SIZE as usize];
        let len = self
            .store
            .lock_irq(&self.cpu.interrupts)
            .load(name, &mut buf)
            .ok_or_else(|| LaunchError::NotFound(name.to_owned()))?;
        let bytes = &buf[..len];

        let parsed = image::parse(bytes)?;
        let main = self
            .entries
            .resolve(parsed.entry)
            .ok_or_else(|| LaunchError::UnknownEntry(parsed.entry.to_owned()))?;

        let pid = {
            let mut state = self.state.lock_irq(&self.cpu.interrupts);
            state.reap_zombies();
            state.admit(name, bytes, args, mode, parent)?
        };

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("pid{pid}:{name}"))
            .spawn(move || userland::process_main(&shared, pid, main));
        if let Err(e) = spawned {
            self.state.lock_irq(&self.cpu.interrupts).destroy(pid);
            return Err(LaunchError::Spawn(e.to_string()));
        }

        debug!("created pid {pid} ({name}, {mode:?}) for {parent}");
        Ok(pid)
    }
}
