//! # Ring 3 execution
//!
//! A process is a host thread running its program against a
//! [`UserContext`], the kernel side of the trap port. The context is where
//! the simulated CPU crosses privilege levels:
//!
//! * every memory access and every trap is an interrupt window: with `IF`
//!   set, a latched timer interrupt is taken before the access;
//! * user accesses are translated through the process's own directory with
//!   user permissions, so a stray pointer ends in a page fault;
//! * `int 0x80` saves the register file on the supervisor stack, masks
//!   interrupts and enters the dispatcher; `iret` restores `IF`.
//!
//! ```text
//!   process_main ──wait_turn──► resume from frame ──► main(&mut ctx)
//!                                                        │ Ok / Exited / Faulted
//!                                                        ▼
//!                       foreground: fold back to parent ◄── terminate
//!                       background: park as zombie until switched out
//! ```

use crate::Shared;
use crate::cpu::{Context, Halted};
use crate::interrupts::{SYSCALL_VECTOR, page_fault};
use crate::process::{ExitStatus, Pid, ProcState};
use crate::state::KernelState;
use crate::syscall;
use crate::trap_frame::{InterruptFrame, TIMER_VECTOR};
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{PageDirectory, PageFault};
use kernel_vmem::address_space::{read_virtual, write_virtual};
use log::{debug, trace};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use stdlib::{ProgramMain, SyscallPort, Unwind, UserResult};

/// The CPU as seen from one process.
pub struct UserContext<'a> {
    shared: &'a Arc<Shared>,
    pid: Pid,
    directory: PageDirectory,
    esp: u32,
    /// Set once the program may not run any further.
    stopped: Option<Unwind>,
}

impl<'a> UserContext<'a> {
    fn resume(shared: &'a Arc<Shared>, pid: Pid) -> Option<Self> {
        let state = shared.state.lock_irq(&shared.cpu.interrupts);
        let pcb = state.procs.get(pid)?;
        let directory = pcb.space.as_ref()?.directory();
        let frame = InterruptFrame::read_from(&state.memory, pcb.saved_context);
        drop(state);

        if frame.eflags.interrupt_enable() {
            shared.cpu.interrupts.enable();
        }
        Some(Self {
            shared,
            pid,
            directory,
            esp: frame.useresp,
            stopped: None,
        })
    }

    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    pub(crate) const fn shared(&self) -> &'a Arc<Shared> {
        self.shared
    }

    /// Record why the program stops and return the reason for `?`.
    pub(crate) fn stop(&mut self, why: Unwind) -> Unwind {
        *self.stopped.get_or_insert(why)
    }

    fn check_running(&mut self) -> UserResult<()> {
        if let Some(why) = self.stopped {
            return Err(why);
        }
        if self.shared.cpu.is_halted() {
            return Err(self.stop(Unwind::Halted));
        }
        Ok(())
    }

    /// Take a pending timer interrupt if `IF` is set.
    fn interrupt_window(&mut self) -> UserResult<()> {
        let shared = self.shared;
        let cpu = &shared.cpu;
        if !cpu.interrupts.is_enabled() || !cpu.take_timer() {
            return Ok(());
        }

        self.save_frame(TIMER_VECTOR, [0; 4]);
        cpu.interrupts.disable();
        if let Some(switch) = shared.timer_tick() {
            trace!("preempting pid {} for pid {}", self.pid, switch.to);
            cpu.hand_off(Context::Process(switch.to));
            cpu.wait_turn(Context::Process(self.pid))
                .map_err(|Halted| self.stop(Unwind::Halted))?;
        }
        self.iret();
        Ok(())
    }

    /// Write the user register file to the supervisor stack.
    fn save_frame(&self, vector: u32, [eax, ebx, ecx, edx]: [u32; 4]) {
        // Sampled before `lock_irq` masks interrupts.
        let interrupts_on = self.shared.cpu.interrupts.is_enabled();
        let mut state = self.shared.state.lock_irq(&self.shared.cpu.interrupts);
        let KernelState { memory, procs, .. } = &mut *state;
        let Some(pcb) = procs.get(self.pid) else {
            return;
        };
        let mut frame = InterruptFrame::read_from(memory, pcb.saved_context);
        frame.int_no = vector;
        frame.eax = eax;
        frame.ebx = ebx;
        frame.ecx = ecx;
        frame.edx = edx;
        frame.useresp = self.esp;
        frame.eflags = frame.eflags.with_interrupt_enable(interrupts_on);
        frame.write_to(memory, pcb.saved_context);
    }

    /// Return to ring 3 with the saved `esp` and `IF`.
    fn iret(&mut self) {
        let state = self.shared.state.lock_irq(&self.shared.cpu.interrupts);
        let frame = state
            .procs
            .get(self.pid)
            .map(|pcb| InterruptFrame::read_from(&state.memory, pcb.saved_context));
        drop(state);
        if let Some(frame) = frame {
            self.esp = frame.useresp;
            if frame.eflags.interrupt_enable() {
                self.shared.cpu.interrupts.enable();
            }
        }
    }

    /// `sti; hlt` until `done` holds, servicing timer interrupts in kernel
    /// mode. Returns with interrupts masked.
    ///
    /// # Errors
    /// [`Unwind::Halted`] if the machine stops while idling.
    pub(crate) fn idle_until(&mut self, mut done: impl FnMut(&mut Self) -> bool) -> UserResult<()> {
        let shared = self.shared;
        let cpu = &shared.cpu;
        loop {
            if done(self) {
                return Ok(());
            }
            cpu.interrupts.enable();
            cpu.hlt().map_err(|Halted| self.stop(Unwind::Halted))?;
            cpu.interrupts.disable();
            if cpu.take_timer()
                && let Some(switch) = shared.timer_tick()
            {
                cpu.hand_off(Context::Process(switch.to));
                cpu.wait_turn(Context::Process(self.pid))
                    .map_err(|Halted| self.stop(Unwind::Halted))?;
                cpu.interrupts.disable();
            }
        }
    }

    /// Supervisor read of the caller's memory. A miss here is a kernel bug
    /// and panics the machine.
    ///
    /// # Errors
    /// [`Unwind::Halted`] after a kernel-mode fault.
    pub(crate) fn copy_from_user(&mut self, va: u32, buf: &mut [u8]) -> UserResult<()> {
        let result = {
            let state = self.shared.state.lock_irq(&self.shared.cpu.interrupts);
            read_virtual(&state.memory, self.directory, VirtualAddress::new(va), buf, false)
        };
        result.map_err(|fault| {
            let why = page_fault::handle(self.shared, self.pid, fault);
            self.stop(why)
        })
    }

    /// Supervisor write to the caller's memory.
    ///
    /// # Errors
    /// [`Unwind::Halted`] after a kernel-mode fault.
    pub(crate) fn copy_to_user(&mut self, va: u32, data: &[u8]) -> UserResult<()> {
        let result = {
            let mut state = self.shared.state.lock_irq(&self.shared.cpu.interrupts);
            write_virtual(&mut state.memory, self.directory, VirtualAddress::new(va), data, false)
        };
        result.map_err(|fault| {
            let why = page_fault::handle(self.shared, self.pid, fault);
            self.stop(why)
        })
    }

    /// Read a NUL-terminated string of at most `limit` bytes (NUL excluded),
    /// one page at a time so nothing past the terminator is touched.
    ///
    /// # Errors
    /// [`Unwind::Halted`] after a kernel-mode fault.
    pub(crate) fn read_c_string(&mut self, va: u32, limit: usize) -> UserResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut cursor = va;
        while out.len() < limit {
            let to_page_end = (FRAME_SIZE - VirtualAddress::new(cursor).page_offset()) as usize;
            let mut chunk = vec![0u8; to_page_end.min(limit - out.len())];
            self.copy_from_user(cursor, &mut chunk)?;
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                out.extend_from_slice(&chunk[..nul]);
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
            #[allow(clippy::cast_possible_truncation)]
            let Some(next) = cursor.checked_add(chunk.len() as u32) else {
                break;
            };
            cursor = next;
        }
        Ok(out)
    }

    fn user_access<T>(
        &mut self,
        access: impl FnOnce(&mut KernelState, PageDirectory) -> Result<T, PageFault>,
    ) -> UserResult<T> {
        self.check_running()?;
        self.interrupt_window()?;
        let result = {
            let mut state = self.shared.state.lock_irq(&self.shared.cpu.interrupts);
            access(&mut *state, self.directory)
        };
        result.map_err(|fault| {
            self.save_frame(page_fault::PAGE_FAULT_VECTOR, [0; 4]);
            let why = page_fault::handle(self.shared, self.pid, fault);
            self.stop(why)
        })
    }
}

impl SyscallPort for UserContext<'_> {
    fn trap(&mut self, number: u32, ebx: u32, ecx: u32, edx: u32) -> UserResult<u32> {
        self.check_running()?;
        self.interrupt_window()?;

        // int 0x80 goes through an interrupt gate.
        self.save_frame(SYSCALL_VECTOR, [number, ebx, ecx, edx]);
        self.shared.cpu.interrupts.disable();
        let result = syscall::dispatch(self, number, [ebx, ecx, edx]);
        if result.is_ok() {
            self.iret();
        }
        result
    }

    fn load(&mut self, va: u32, buf: &mut [u8]) -> UserResult<()> {
        self.user_access(|state, directory| {
            read_virtual(&state.memory, directory, VirtualAddress::new(va), buf, true)
        })
    }

    fn store(&mut self, va: u32, data: &[u8]) -> UserResult<()> {
        self.user_access(|state, directory| {
            write_virtual(&mut state.memory, directory, VirtualAddress::new(va), data, true)
        })
    }

    fn stack_pointer(&self) -> u32 {
        self.esp
    }

    fn set_stack_pointer(&mut self, esp: u32) {
        self.esp = esp;
    }
}

/// Body of a process thread.
pub(crate) fn process_main(shared: &Arc<Shared>, pid: Pid, main: ProgramMain) {
    if shared.cpu.wait_turn(Context::Process(pid)).is_err() {
        return;
    }
    let Some(mut ctx) = UserContext::resume(shared, pid) else {
        return;
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| main(&mut ctx)));
    let status = match (ctx.stopped, outcome) {
        (_, Err(payload)) => {
            let what = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown cause".to_owned());
            crate::panic::kernel_panic(shared, &format!("pid {pid} crashed: {what}"));
            return;
        }
        (Some(Unwind::Halted), _) | (None, Ok(Err(Unwind::Halted))) => return,
        (Some(Unwind::Faulted), _) | (None, Ok(Err(Unwind::Faulted))) => ExitStatus::Faulted,
        (Some(Unwind::Exited(code)), _) | (None, Ok(Err(Unwind::Exited(code))) | Ok(Ok(code))) => {
            ExitStatus::Exited(code)
        }
    };
    terminate(shared, pid, status);
}

/// Turn `pid` into a zombie and give the CPU away for good.
fn terminate(shared: &Arc<Shared>, pid: Pid, status: ExitStatus) {
    let cpu = &shared.cpu;
    cpu.interrupts.disable();

    let fold_back = {
        let mut state = shared.state.lock_irq(&cpu.interrupts);
        let Some(pcb) = state.procs.get_mut(pid) else {
            return;
        };
        pcb.state = ProcState::Zombie;
        pcb.exit = Some(status);
        let parent = pcb.foreground.then_some(pcb.parent);

        if let Some(parent) = parent {
            let resumed = match parent {
                Context::Process(ppid) => {
                    state.procs.set_state(ppid, ProcState::Running);
                    Some(ppid)
                }
                Context::Kernel => None,
            };
            state.procs.current = resumed;
            cpu.load_cr3(state.directory_base(resumed));
            cpu.set_esp0(resumed.map_or(0, |ppid| state.kernel_stack_top(ppid)));
        }
        parent
    };
    debug!("pid {pid} terminated: {status:?}");
    shared
        .console
        .lock_irq(&cpu.interrupts)
        .restore_text_mode();

    match fold_back {
        Some(parent) => cpu.hand_off(parent),
        None => park_zombie(shared, pid),
    }
}

/// A finished background process keeps the CPU, idling with interrupts on,
/// until the scheduler picks somebody else. Then its thread ends.
fn park_zombie(shared: &Shared, pid: Pid) {
    let cpu = &shared.cpu;
    loop {
        cpu.interrupts.enable();
        if cpu.hlt().is_err() {
            return;
        }
        cpu.interrupts.disable();
        if cpu.take_timer()
            && let Some(switch) = shared.timer_tick()
        {
            trace!("zombie pid {pid} switched out for pid {}", switch.to);
            cpu.hand_off(Context::Process(switch.to));
            return;
        }
    }
}

/// Hand the CPU from `parent` to its new foreground `child` and block until
/// the child terminates. The child is destroyed before returning.
///
/// # Errors
/// [`Halted`] if the machine stops in the meantime.
pub(crate) fn run_foreground(shared: &Shared, parent: Context, child: Pid) -> Result<ExitStatus, Halted> {
    let cpu = &shared.cpu;
    let cwd = shared.store.lock_irq(&cpu.interrupts).current_dir();

    {
        let mut state = shared.state.lock_irq(&cpu.interrupts);
        if let Context::Process(ppid) = parent {
            state.procs.set_state(ppid, ProcState::Waiting);
        }
        state.procs.set_state(child, ProcState::Running);
        state.procs.current = Some(child);
        cpu.load_cr3(state.directory_base(Some(child)));
        cpu.set_esp0(state.kernel_stack_top(child));
    }

    cpu.hand_off(Context::Process(child));
    cpu.wait_turn(parent)?;
    cpu.interrupts.disable();

    let status = {
        let mut state = shared.state.lock_irq(&cpu.interrupts);
        let status = state.procs.get(child).and_then(|p| p.exit);
        state.destroy(child);
        status
    };
    shared.store.lock_irq(&cpu.interrupts).set_current_dir(cwd);
    Ok(status.unwrap_or(ExitStatus::Faulted))
}
