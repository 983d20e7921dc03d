//! Page fault (#PF) handler.
//!
//! A fault raised by ring 3 costs the process its life; one raised by the
//! kernel itself brings the machine down.

use crate::Shared;
use crate::panic::kernel_panic;
use crate::process::Pid;
use kernel_vmem::PageFault;
use log::warn;
use stdlib::Unwind;

pub const PAGE_FAULT_VECTOR: u32 = 14;

/// Handle `fault` taken while `pid` was running and say how the process
/// unwinds.
pub(crate) fn handle(shared: &Shared, pid: Pid, fault: PageFault) -> Unwind {
    if fault.from_user() {
        warn!("pid {pid}: {fault}");
        shared
            .console
            .lock_irq(&shared.cpu.interrupts)
            .write(b"Segmentation fault\n");
        Unwind::Faulted
    } else {
        kernel_panic(shared, &format!("kernel-mode {fault} (pid {pid})"));
        Unwind::Halted
    }
}
