use alloc::format;
use alloc::string::String;
use stdlib::syscall_abi::MemInfo;
use stdlib::{SyscallPort, UserResult, Userland};

pub fn main(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    let Some(info) = sys.meminfo()? else {
        sys.print("free: meminfo failed\n")?;
        return Ok(1);
    };
    sys.print(&report(&info))?;
    Ok(0)
}

/// The table printed by `free`, in kB.
#[must_use]
pub fn report(info: &MemInfo) -> String {
    let plural = if info.procs == 1 { "" } else { "s" };
    format!(
        "         total       used       free\n\
         Phys:  {:>8} kB {:>8} kB {:>8} kB\n\
         Virt:  {:>8} kB {:>8} kB {:>8} kB   ({} proc{plural})\n",
        info.phys_total_kb,
        info.phys_used_kb,
        info.phys_free_kb,
        info.virt_total_kb,
        info.virt_used_kb,
        info.virt_free_kb,
        info.procs,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn columns_are_right_aligned() {
        let info = MemInfo {
            phys_total_kb: 130_048,
            phys_used_kb: 284,
            phys_free_kb: 129_764,
            virt_total_kb: 4096,
            virt_used_kb: 284,
            virt_free_kb: 3812,
            procs: 1,
        };
        let text = report(&info);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "         total       used       free");
        assert_eq!(lines[1], "Phys:    130048 kB      284 kB   129764 kB");
        assert_eq!(lines[2], "Virt:      4096 kB      284 kB     3812 kB   (1 proc)");
    }

    #[test]
    fn several_processes_are_plural() {
        let info = MemInfo {
            procs: 3,
            ..MemInfo::default()
        };
        assert!(report(&info).ends_with("(3 procs)\n"));
    }
}
