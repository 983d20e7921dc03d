//! Kernel panic: report on the console and the serial line, then halt.

use crate::Shared;
use crate::process::Pid;
use crate::trap_frame::InterruptFrame;
use kernel_serial::serial_trace;
use log::error;
use std::fmt::Write;

/// Machine state captured for the panic report.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RegisterDump {
    pub cr3: u32,
    pub esp0: u32,
    pub pid: Option<Pid>,
    pub ticks: u64,
    /// The current process's last saved register file.
    pub frame: Option<InterruptFrame>,
}

/// Format the panic report.
#[must_use]
pub fn render(message: &str, dump: &RegisterDump) -> String {
    let mut out = format!("[PANIC] {message}\n");
    let pid = dump
        .pid
        .map_or_else(|| "kernel".to_owned(), |pid| pid.to_string());
    let _ = writeln!(
        out,
        "  pid={pid} ticks={} cr3={:#010x} esp0={:#010x}",
        dump.ticks, dump.cr3, dump.esp0
    );
    if let Some(f) = dump.frame {
        let _ = writeln!(
            out,
            "  int={} eax={:#010x} ebx={:#010x} ecx={:#010x} edx={:#010x}",
            f.int_no, f.eax, f.ebx, f.ecx, f.edx
        );
        let _ = writeln!(
            out,
            "  eip={:#010x} cs={:#06x} eflags={:#010x} esp={:#010x} ss={:#06x}",
            f.eip,
            f.cs,
            f.eflags.into_bits(),
            f.useresp,
            f.ss
        );
    }
    out
}

/// Report `message` and halt the machine. Never recovered from.
pub(crate) fn kernel_panic(shared: &Shared, message: &str) {
    let dump = {
        let state = shared.state.lock_irq(&shared.cpu.interrupts);
        let pid = state.procs.current;
        let frame = pid
            .and_then(|pid| state.procs.get(pid))
            .filter(|pcb| pcb.space.is_some())
            .map(|pcb| InterruptFrame::read_from(&state.memory, pcb.saved_context));
        RegisterDump {
            cr3: shared.cpu.cr3(),
            esp0: shared.cpu.esp0(),
            pid,
            ticks: state.ticks,
            frame,
        }
    };

    let report = render(message, &dump);
    shared
        .console
        .lock_irq(&shared.cpu.interrupts)
        .write(report.as_bytes());
    serial_trace!("{report}");
    error!("kernel panic: {message}");
    shared.cpu.halt(message);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn the_report_starts_with_the_message() {
        let dump = RegisterDump {
            cr3: 0x0010_0000,
            esp0: 0x0010_3000,
            pid: Some(1),
            ticks: 42,
            frame: Some(InterruptFrame::first_entry()),
        };
        let report = render("out of ideas", &dump);
        let mut lines = report.lines();
        assert_eq!(lines.next(), Some("[PANIC] out of ideas"));
        assert_eq!(
            lines.next(),
            Some("  pid=1 ticks=42 cr3=0x00100000 esp0=0x00103000")
        );
        assert!(report.contains("eip=0x00400020 cs=0x001b eflags=0x00000202"));
        assert!(report.contains("esp=0x00800000 ss=0x0023"));
    }

    #[test]
    fn the_boot_context_has_no_frame() {
        let dump = RegisterDump {
            cr3: 0x0002_1000,
            esp0: 0,
            pid: None,
            ticks: 0,
            frame: None,
        };
        let report = render("boom", &dump);
        assert_eq!(report.lines().count(), 2);
        assert!(report.contains("pid=kernel"));
    }
}
