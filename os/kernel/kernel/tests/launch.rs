mod common;

use common::{boot, boot_with, shell};
use kernel::config::FRAMES_PER_PROCESS;
use kernel::{ExitStatus, KernelConfig, KernelError, LaunchError};

#[test]
fn hello_prints_the_greeting_from_its_image() {
    let m = boot();
    let before = m.frames_used();

    assert_eq!(m.kernel.run("hello", "").unwrap(), ExitStatus::Exited(0));
    assert_eq!(m.output(), "Hello from ring 3!\n");
    assert_eq!(m.console.text_mode_restores(), 1);
    assert_eq!(m.frames_used(), before);
}

#[test]
fn a_missing_image_is_a_launch_failure() {
    let m = boot();
    let before = m.frames_used();

    let err = m.kernel.run("nope", "").unwrap_err();
    assert!(matches!(
        err,
        KernelError::Launch(LaunchError::NotFound(ref name)) if name == "nope"
    ));
    assert_eq!(m.frames_used(), before);
    assert!(m.kernel.halted().is_none());
}

#[test]
fn overlong_names_are_rejected() {
    let m = boot();
    let name = "x".repeat(40);
    assert!(matches!(
        m.kernel.run(&name, ""),
        Err(KernelError::Launch(LaunchError::InvalidName(_)))
    ));
}

#[test]
fn a_user_fault_ends_only_the_offender() {
    let m = boot();
    let before = m.frames_used();

    assert_eq!(m.kernel.run("t_segflt", "").unwrap(), ExitStatus::Faulted);
    assert_eq!(ExitStatus::Faulted.code(), 139);
    assert!(m.output().contains("Segmentation fault\n"));
    assert!(!m.output().contains("went through"));
    assert_eq!(m.frames_used(), before);

    // The machine is unaffected.
    assert_eq!(m.kernel.run("hello", "").unwrap(), ExitStatus::Exited(0));
}

#[test]
fn the_heap_is_unmapped_until_grown() {
    let m = boot();
    assert_eq!(m.kernel.run("t_mall2", "").unwrap(), ExitStatus::Faulted);
    assert!(!m.output().contains("ERROR"));
}

#[test]
fn repeated_launches_do_not_leak() {
    let m = boot();
    let before = m.frames_used();

    assert_eq!(m.kernel.run("t_exec", "").unwrap(), ExitStatus::Exited(0));
    let out = m.output();
    assert!(out.ends_with("exec: OK\n"), "{out}");
    assert_eq!(out.matches("Hello from ring 3!").count(), 300);
    assert_eq!(m.frames_used(), before);
}

#[test]
fn the_shell_reports_unknown_commands() {
    let m = boot();
    assert_eq!(shell(&m, "nope\n\nhello\nexit\n"), 0);
    let out = m.output();
    assert!(out.contains("unknown command\n"));
    assert!(out.contains("Hello from ring 3!\n"));
    assert_eq!(out.matches("> ").count(), 4);
}

#[test]
fn a_child_exit_code_reaches_the_shell() {
    let m = boot();
    assert_eq!(shell(&m, "t_segflt\nhello\nexit\n"), 0);
    let out = m.output();
    let fault = out.find("Segmentation fault").unwrap();
    let hello = out.find("Hello from ring 3!").unwrap();
    assert!(fault < hello);
    assert!(!out.contains("unknown command"));
}

#[test]
fn a_full_table_refuses_launches() {
    let m = boot_with(KernelConfig::default().with_max_procs(1), &[]);
    assert_eq!(shell(&m, "hello\nexit\n"), 0);
    assert!(m.output().contains("unknown command\n"));
    assert!(!m.output().contains("Hello"));
}

#[test]
fn exhausted_memory_rolls_the_launch_back() {
    let config = KernelConfig::default().with_managed_frames(FRAMES_PER_PROCESS - 1);
    let m = boot_with(config, &[]);

    assert!(matches!(
        m.kernel.run("hello", ""),
        Err(KernelError::Launch(LaunchError::AddressSpace(_)))
    ));
    assert_eq!(m.frames_used(), 0);
}

#[test]
fn one_process_fits_exactly() {
    let config = KernelConfig::default().with_managed_frames(FRAMES_PER_PROCESS);
    let m = boot_with(config, &[]);
    assert_eq!(m.kernel.run("hello", "").unwrap(), ExitStatus::Exited(0));
    assert_eq!(m.frames_used(), 0);
}

fn unknown_syscall(sys: &mut dyn stdlib::SyscallPort) -> stdlib::UserResult<i32> {
    let refused = sys.trap(99, 0, 0, 0)? == stdlib::syscall_abi::FAILURE;
    let bad_fd = sys.trap(1, 7, 0, 0)? == stdlib::syscall_abi::FAILURE;
    Ok(i32::from(refused) + i32::from(bad_fd))
}

#[test]
fn bad_requests_fail_without_side_effects() {
    let probe = stdlib::Program {
        name: "unknown",
        main: unknown_syscall,
        data: &[],
    };
    let m = boot_with(KernelConfig::default(), &[probe]);
    assert_eq!(m.kernel.run("unknown", "").unwrap(), ExitStatus::Exited(2));
    assert!(m.output().is_empty());
}
