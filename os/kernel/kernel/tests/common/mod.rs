#![allow(dead_code)]

use kernel::{BufferConsole, Kernel, KernelConfig};
use std::thread;
use std::time::Duration;
use stdlib::Program;

/// Halts a machine that is still running after this long, so a lost
/// wake-up fails the test instead of hanging it.
const WATCHDOG: Duration = Duration::from_secs(60);

pub struct Machine {
    pub kernel: Kernel,
    pub console: BufferConsole,
}

impl Machine {
    pub fn output(&self) -> String {
        self.console.output_string()
    }

    pub fn frames_used(&self) -> usize {
        self.kernel.frame_stats().used
    }
}

pub fn boot() -> Machine {
    boot_with(KernelConfig::default(), &[])
}

/// Boot with every installed program plus `extra`.
pub fn boot_with(config: KernelConfig, extra: &[Program]) -> Machine {
    let console = BufferConsole::new();
    let kernel = Kernel::builder()
        .config(config)
        .programs(programs::ALL)
        .programs(extra)
        .console(console.clone())
        .boot()
        .expect("boot");

    let halt = kernel.halt_handle();
    thread::spawn(move || {
        thread::sleep(WATCHDOG);
        halt.halt("watchdog");
    });
    Machine { kernel, console }
}

/// Run the shell on `script` (which must end in `exit`).
pub fn shell(machine: &Machine, script: &str) -> i32 {
    machine.console.push_input(script.as_bytes());
    machine.kernel.run("sh", "").expect("sh").code()
}
