mod common;

use common::{boot, boot_with};
use kernel::config::FRAMES_PER_PROCESS;
use kernel::{ExitStatus, KernelConfig};
use stdlib::layout::{HEAP_BASE, PROG_FRAMES, USER_STACK_FRAMES};
use stdlib::{Program, SyscallPort, UserResult, Userland};

/// Pages every fresh process has mapped in its private table.
const BASE_PAGES: u32 = PROG_FRAMES + USER_STACK_FRAMES;

/// Exits with the used virtual memory it sees, in kB.
fn virt_used(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    let info = sys.meminfo()?.expect("meminfo");
    Ok(i32::try_from(info.virt_used_kb).unwrap())
}

/// Exits with the number of live processes it sees.
fn live_procs(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    let info = sys.meminfo()?.expect("meminfo");
    Ok(i32::try_from(info.procs).unwrap())
}

fn grow_then_measure(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    sys.sbrk(4096)?.expect("sbrk");
    virt_used(sys)
}

/// Asks for two pages when only one frame is left.
fn partial_growth(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    if sys.sbrk(8192)?.is_some() {
        return Ok(1);
    }
    if sys.sbrk(0)? != Some(HEAP_BASE) {
        return Ok(2);
    }
    // The page granted before the failure stays usable.
    sys.store_u32(HEAP_BASE, 7)?;
    if sys.load_u32(HEAP_BASE)? != 7 {
        return Ok(3);
    }
    virt_used(sys)
}

const PROBES: &[Program] = &[
    Program {
        name: "virt_used",
        main: virt_used,
        data: &[],
    },
    Program {
        name: "live_procs",
        main: live_procs,
        data: &[],
    },
    Program {
        name: "grow",
        main: grow_then_measure,
        data: &[],
    },
    Program {
        name: "partial",
        main: partial_growth,
        data: &[],
    },
];

#[test]
fn malloc_self_check_passes() {
    let m = boot();
    assert_eq!(m.kernel.run("t_mall1", "").unwrap(), ExitStatus::Exited(0));
    let out = m.output();
    for step in [
        "alloc+write: ok",
        "multi-alloc: ok",
        "free+reuse: ok",
        "large-alloc: ok",
        "exhaustion: ok",
        "malloc: OK",
    ] {
        assert!(out.contains(step), "missing {step:?} in {out}");
    }
}

#[test]
fn recycled_frames_come_back_zeroed() {
    let m = boot();
    let before = m.frames_used();
    // The second run reuses the frames the first one dirtied.
    for _ in 0..2 {
        assert_eq!(m.kernel.run("t_heap", "").unwrap(), ExitStatus::Exited(0));
    }
    assert_eq!(m.output(), "heap: OK\nheap: OK\n");
    assert_eq!(m.frames_used(), before);
}

#[test]
fn virtual_usage_counts_mapped_pages() {
    let m = boot_with(KernelConfig::default(), PROBES);
    let base = i32::try_from(BASE_PAGES * 4).unwrap();
    assert_eq!(m.kernel.run("virt_used", "").unwrap(), ExitStatus::Exited(base));
    assert_eq!(m.kernel.run("grow", "").unwrap(), ExitStatus::Exited(base + 4));
}

#[test]
fn granted_pages_survive_a_failed_growth() {
    let config = KernelConfig::default().with_managed_frames(FRAMES_PER_PROCESS + 1);
    let m = boot_with(config, PROBES);
    let expected = i32::try_from((BASE_PAGES + 1) * 4).unwrap();
    assert_eq!(m.kernel.run("partial", "").unwrap(), ExitStatus::Exited(expected));
    assert_eq!(m.frames_used(), 0);
}

#[test]
fn only_live_processes_are_counted() {
    let m = boot_with(KernelConfig::default(), PROBES);
    assert_eq!(m.kernel.run("live_procs", "").unwrap(), ExitStatus::Exited(1));

    let info = m.kernel.mem_info();
    assert_eq!(info.procs, 0);
    assert_eq!(info.virt_total_kb, 0);
    assert_eq!(info.phys_used_kb, 0);
    assert_eq!(info.phys_total_kb, info.phys_free_kb);
}

#[test]
fn free_prints_the_usage_table() {
    let m = boot();
    assert_eq!(m.kernel.run("free", "").unwrap(), ExitStatus::Exited(0));
    let out = m.output();
    let mut lines = out.lines();
    assert_eq!(lines.next(), Some("         total       used       free"));
    assert!(lines.next().unwrap().starts_with("Phys:"));
    let virt = lines.next().unwrap();
    assert!(virt.starts_with("Virt:      4096 kB"), "{virt}");
    assert!(virt.ends_with("(1 proc)"));
}

#[test]
fn the_shell_runs_the_heap_checks() {
    let m = boot();
    assert_eq!(common::shell(&m, "t_mall1\nt_heap\nexit\n"), 0);
    let out = m.output();
    assert!(out.contains("malloc: OK"));
    assert!(out.contains("heap: OK"));
}
