//! # Programs
//!
//! The user programs installed on the boot disk. Each one runs in ring 3
//! against a [`SyscallPort`](stdlib::SyscallPort) and sees nothing of the
//! kernel beyond the `int 0x80` interface.
//!
//! | Name      | Purpose                                              |
//! |-----------|------------------------------------------------------|
//! | `sh`      | interactive shell, `prog args` and `prog args &`     |
//! | `hello`   | prints the greeting stored in its image              |
//! | `free`    | physical and virtual memory usage                    |
//! | `panic`   | brings the machine down with the given message       |
//! | `t_*`     | self-checks for the kernel's process and memory core |

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

mod checks;
mod free;
mod hello;
mod panic;
mod sh;

use stdlib::Program;

pub const SH: Program = Program {
    name: "sh",
    main: sh::main,
    data: &[],
};
pub const HELLO: Program = Program {
    name: "hello",
    main: hello::main,
    data: hello::GREETING,
};
pub const FREE: Program = Program {
    name: "free",
    main: free::main,
    data: &[],
};
pub const PANIC: Program = Program {
    name: "panic",
    main: panic::main,
    data: &[],
};
pub const T_BG: Program = Program {
    name: "t_bg",
    main: checks::background,
    data: &[],
};
pub const T_EXEC: Program = Program {
    name: "t_exec",
    main: checks::exec_many,
    data: &[],
};
pub const T_SLEEP: Program = Program {
    name: "t_sleep",
    main: checks::sleep,
    data: &[],
};
pub const T_SEGFLT: Program = Program {
    name: "t_segflt",
    main: checks::segfault,
    data: &[],
};
pub const T_MALL1: Program = Program {
    name: "t_mall1",
    main: checks::malloc,
    data: &[],
};
pub const T_MALL2: Program = Program {
    name: "t_mall2",
    main: checks::unmapped_heap,
    data: &[],
};
pub const T_HEAP: Program = Program {
    name: "t_heap",
    main: checks::sbrk,
    data: &[],
};

/// Every program, in the order they are installed.
pub const ALL: &[Program] = &[
    SH, HELLO, FREE, PANIC, T_BG, T_EXEC, T_SLEEP, T_SEGFLT, T_MALL1, T_MALL2, T_HEAP,
];
