//! Boots the machine on the host and runs the shell (or any other installed
//! program) in the foreground until it exits or standard input ends.

mod terminal;

use clap::Parser;
use kernel::{Kernel, KernelConfig, KernelError};
use kernel_serial::SerialLogger;
use log::{LevelFilter, info};
use std::error::Error;
use std::process::ExitCode;
use std::thread;
use terminal::Terminal;

const END_OF_INPUT: &str = "end of input";

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Program to start in the foreground.
    #[arg(long, default_value = "sh")]
    shell: String,

    /// Argument string handed to the program.
    #[arg(default_value = "")]
    args: String,

    /// Timer frequency.
    #[arg(long, default_value_t = 100)]
    tick_hz: u32,

    /// Size of the process table.
    #[arg(long, default_value_t = 8)]
    max_procs: usize,

    /// Physical frames managed by the frame allocator.
    #[arg(long)]
    frames: Option<u32>,

    /// Verbosity of the serial log on standard error.
    #[arg(long, default_value_t = LevelFilter::Warn)]
    log_level: LevelFilter,

    /// List the installed programs and exit.
    #[arg(long)]
    list: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    SerialLogger::new(args.log_level).init().ok();

    if args.list {
        for program in programs::ALL {
            println!("{}", program.name);
        }
        return ExitCode::SUCCESS;
    }

    match run(&args) {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("init: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<i32, Box<dyn Error>> {
    let mut config = KernelConfig::default()
        .with_tick_hz(args.tick_hz)
        .with_max_procs(args.max_procs);
    if let Some(frames) = args.frames {
        config = config.with_managed_frames(frames);
    }

    let (terminal, input_closed) = Terminal::spawn()?;
    let kernel = Kernel::builder()
        .config(config)
        .programs(programs::ALL)
        .console(terminal)
        .boot()?;

    let halt = kernel.halt_handle();
    thread::Builder::new()
        .name("eof".into())
        .spawn(move || {
            if input_closed.recv().is_ok() {
                halt.halt(END_OF_INPUT);
            }
        })?;

    match kernel.run(&args.shell, &args.args) {
        Ok(status) => {
            info!("{} exited with {}", args.shell, status.code());
            Ok(status.code())
        }
        Err(KernelError::Halted(reason)) if reason == END_OF_INPUT => Ok(0),
        Err(e) => Err(e.into()),
    }
}
