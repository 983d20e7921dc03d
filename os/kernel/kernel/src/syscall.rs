//! `int 0x80` dispatcher.
//!
//! Arguments arrive in `ebx`, `ecx` and `edx`; the returned value goes back
//! to user mode in `eax`. Calls that fail return [`FAILURE`]. Calls that do
//! not return (exit, panic) yield the unwind reason instead.

use crate::cpu::{Context, Halted};
use crate::process::{LaunchMode, ProcState};
use crate::state::KernelState;
use crate::userland::{UserContext, run_foreground};
use kernel_info::memory::{ARGS_MAX, FRAME_SIZE, HEAP_LIMIT};
use kernel_info::sched::NAME_MAX;
use kernel_memory_addresses::{Size4K, VirtualAddress, align_down};
use log::{debug, warn};
use stdlib::syscall_abi::{EXEC_BACKGROUND, FAILURE, MemInfo, STDERR, STDOUT, Sysno};
use stdlib::{Unwind, UserResult};

/// Longest message accepted by the panic call.
const PANIC_MESSAGE_MAX: usize = 256;

/// Bytes copied to the console per step of a write.
const WRITE_CHUNK: usize = FRAME_SIZE as usize;

pub fn dispatch(ctx: &mut UserContext<'_>, number: u32, [ebx, ecx, edx]: [u32; 3]) -> UserResult<u32> {
    let Ok(sysno) = Sysno::try_from(number) else {
        warn!("pid {}: unknown syscall {number}", ctx.pid());
        return Ok(FAILURE);
    };

    match sysno {
        #[allow(clippy::cast_possible_wrap)]
        Sysno::Exit => Err(ctx.stop(Unwind::Exited(ebx as i32))),
        Sysno::Write => write(ctx, ebx, ecx, edx),
        Sysno::GetChar => get_char(ctx),
        Sysno::GetCharNonblock => {
            let shared = ctx.shared();
            let key = shared.console.lock_irq(&shared.cpu.interrupts).poll_input();
            Ok(key.map_or(0, u32::from))
        }
        #[allow(clippy::cast_possible_wrap)]
        Sysno::Sbrk => Ok(sbrk(ctx, ebx as i32)),
        Sysno::Sleep => sleep(ctx, ebx),
        Sysno::Exec => exec(ctx, ebx, ecx, edx),
        Sysno::MemInfo => mem_info(ctx, ebx),
        Sysno::Panic => {
            let message = ctx.read_c_string(ebx, PANIC_MESSAGE_MAX)?;
            crate::panic::kernel_panic(ctx.shared(), &String::from_utf8_lossy(&message));
            Err(ctx.stop(Unwind::Halted))
        }
        #[allow(clippy::cast_possible_truncation)]
        Sysno::Uptime => {
            let shared = ctx.shared();
            Ok(shared.state.lock_irq(&shared.cpu.interrupts).ticks as u32)
        }
    }
}

fn write(ctx: &mut UserContext<'_>, fd: u32, buf: u32, len: u32) -> UserResult<u32> {
    if fd != STDOUT && fd != STDERR {
        return Ok(FAILURE);
    }

    let mut chunk = vec![0u8; WRITE_CHUNK];
    let mut done = 0u32;
    while done < len {
        let n = (len - done).min(FRAME_SIZE);
        let Some(at) = buf.checked_add(done) else {
            return Ok(FAILURE);
        };
        let bytes = &mut chunk[..n as usize];
        ctx.copy_from_user(at, bytes)?;
        let shared = ctx.shared();
        shared.console.lock_irq(&shared.cpu.interrupts).write(bytes);
        done += n;
    }
    Ok(len)
}

fn get_char(ctx: &mut UserContext<'_>) -> UserResult<u32> {
    let mut key = None;
    ctx.idle_until(|ctx| {
        let shared = ctx.shared();
        key = shared.console.lock_irq(&shared.cpu.interrupts).poll_input();
        key.is_some()
    })?;
    Ok(key.map_or(0, u32::from))
}

/// Move the heap break by `increment` bytes, mapping fresh pages as needed.
///
/// Pages granted before running out of frames stay mapped even though the
/// call fails and the break does not move.
fn sbrk(ctx: &UserContext<'_>, increment: i32) -> u32 {
    let shared = ctx.shared();
    let mut state = shared.state.lock_irq(&shared.cpu.interrupts);
    let KernelState {
        frames,
        memory,
        procs,
        ..
    } = &mut *state;
    let Some(pcb) = procs.get_mut(ctx.pid()) else {
        return FAILURE;
    };
    let old = pcb.heap_break;

    if increment == 0 {
        return old;
    }
    let Ok(grow) = u32::try_from(increment) else {
        return FAILURE;
    };
    let Some(new) = old.checked_add(grow).filter(|&b| b <= HEAP_LIMIT) else {
        return FAILURE;
    };
    let Some(space) = pcb.space.as_ref() else {
        return FAILURE;
    };

    let mut page = align_down::<Size4K>(old);
    while page < new {
        if let Err(e) = space.map_user_page(frames, memory, VirtualAddress::new(page)) {
            debug!("pid {}: sbrk({increment}) failed at {page:#x}: {e}", ctx.pid());
            return FAILURE;
        }
        page += FRAME_SIZE;
    }

    pcb.heap_break = new;
    old
}

fn sleep(ctx: &mut UserContext<'_>, ms: u32) -> UserResult<u32> {
    let pid = ctx.pid();
    let shared = ctx.shared();
    {
        let ticks = shared.config.ticks_for(ms);
        let mut state = shared.state.lock_irq(&shared.cpu.interrupts);
        let deadline = state.ticks + ticks;
        if let Some(pcb) = state.procs.get_mut(pid) {
            pcb.deadline = deadline;
            pcb.state = ProcState::Sleeping;
        }
    }
    ctx.idle_until(|ctx| {
        let shared = ctx.shared();
        shared.state.lock_irq(&shared.cpu.interrupts).procs.state(pid) != ProcState::Sleeping
    })?;
    Ok(0)
}

fn exec(ctx: &mut UserContext<'_>, name_ptr: u32, args_ptr: u32, flags: u32) -> UserResult<u32> {
    if name_ptr == 0 {
        return Ok(FAILURE);
    }
    let name = ctx.read_c_string(name_ptr, NAME_MAX as usize)?;
    let args = if args_ptr == 0 {
        Vec::new()
    } else {
        ctx.read_c_string(args_ptr, ARGS_MAX as usize - 1)?
    };
    let Ok(name) = String::from_utf8(name) else {
        return Ok(FAILURE);
    };

    let mode = if flags & EXEC_BACKGROUND == 0 {
        LaunchMode::Foreground
    } else {
        LaunchMode::Background
    };
    let me = Context::Process(ctx.pid());
    let shared = ctx.shared();
    let child = match shared.create(&name, &args, mode, me) {
        Ok(child) => child,
        Err(e) => {
            debug!("{me}: exec {name:?} failed: {e}");
            return Ok(FAILURE);
        }
    };

    match mode {
        #[allow(clippy::cast_possible_truncation)]
        LaunchMode::Background => Ok(child as u32),
        #[allow(clippy::cast_sign_loss)]
        LaunchMode::Foreground => match run_foreground(shared, me, child) {
            Ok(status) => Ok(status.code() as u32),
            Err(Halted) => Err(ctx.stop(Unwind::Halted)),
        },
    }
}

fn mem_info(ctx: &mut UserContext<'_>, out: u32) -> UserResult<u32> {
    if out == 0 {
        return Ok(FAILURE);
    }
    let info: MemInfo = {
        let shared = ctx.shared();
        shared.state.lock_irq(&shared.cpu.interrupts).mem_info()
    };
    ctx.copy_to_user(out, &info.to_bytes())?;
    Ok(0)
}
