//! A line-oriented shell.
//!
//! `prog args` runs `prog` in the foreground and waits for it; a trailing
//! `&` starts it in the background instead. `exit` leaves the shell.

use alloc::format;
use alloc::string::String;
use stdlib::{SyscallPort, UserResult, Userland};

const PROMPT: &str = "> ";

/// Longest line kept; further keys are dropped until Enter.
const LINE_MAX: usize = 128;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// A parsed command line.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Exit,
    Run {
        program: &'a str,
        args: &'a str,
        background: bool,
    },
}

/// Split a line into a command; `None` for a blank line.
#[must_use]
pub fn parse(line: &str) -> Option<Command<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line == "exit" {
        return Some(Command::Exit);
    }

    let (line, background) = match line.strip_suffix('&') {
        Some(rest) => (rest.trim_end(), true),
        None => (line, false),
    };
    let (program, args) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(program, args)| (program, args.trim_start()));
    if program.is_empty() {
        return None;
    }
    Some(Command::Run {
        program,
        args,
        background,
    })
}

pub fn main(sys: &mut dyn SyscallPort) -> UserResult<i32> {
    loop {
        sys.print(PROMPT)?;
        let line = read_line(sys)?;
        match parse(&line) {
            None => {}
            Some(Command::Exit) => return Ok(0),
            Some(Command::Run {
                program,
                args,
                background: true,
            }) => match sys.spawn(program, args)? {
                Some(pid) => sys.print(&format!("[{pid}] {program}\n"))?,
                None => sys.print("unknown command\n")?,
            },
            Some(Command::Run { program, args, .. }) => {
                if sys.exec(program, args)? < 0 {
                    sys.print("unknown command\n")?;
                }
            }
        }
    }
}

fn read_line(sys: &mut dyn SyscallPort) -> UserResult<String> {
    let mut line = String::new();
    loop {
        match sys.get_char()? {
            b'\n' | b'\r' => return Ok(line),
            BACKSPACE | DELETE => {
                line.pop();
            }
            c if (c.is_ascii_graphic() || c == b' ') && line.len() < LINE_MAX => {
                line.push(char::from(c));
            }
            _ => {}
        }
    }
}
