//! # Serial Debug Output
//!
//! Diagnostic output for the kernel, kept apart from the console that user
//! programs write to. On the host the "serial line" is the process's standard
//! error stream, so test output and kernel traces never mix with captured
//! console text.
//!
//! ## Output Mechanism
//! ```text
//! Kernel Code ──► log::info!() ──► SerialLogger ─┐
//!                                                ├─► SerialSink (fmt::Write) ──► stderr
//! Kernel Code ──► serial_trace!() ───────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Logger ([`SerialLogger`])
//! A `log::Log` implementation that formats records as
//! `[LEVEL] target: message` and hands them to the sink. Installing it is
//! idempotent across a process: the first installed level wins and later
//! calls report [`log::SetLoggerError`].
//!
//! ### Trace Macro ([`serial_trace!`])
//! Direct output bypassing the logging framework, for panic reports and
//! anything that must appear regardless of the configured level.
//!
//! ## Feature System
//!
//! With the default `enabled` feature off, every write becomes a no-op.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_serial::{SerialLogger, serial_trace};
//! use log::{LevelFilter, info};
//!
//! SerialLogger::new(LevelFilter::Debug).init().ok();
//! info!("scheduler armed");
//! serial_trace!("eip={:#010x}\n", 0x0040_0020);
//! ```

mod logger;

pub use logger::SerialLogger;

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod serial_fmt {
    use std::fmt::{self, Write};
    use std::io::{self, Write as _};

    /// Line-oriented sink over standard error.
    pub struct SerialSink;

    impl Write for SerialSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            io::stderr().lock().write_all(s.as_bytes()).map_err(|_| fmt::Error)
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn serial_write(args: fmt::Arguments) {
        // Best effort: a closed stderr must not take the kernel down.
        let _ = fmt::write(&mut SerialSink, args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod serial_fmt {
    use std::fmt;

    #[doc(hidden)]
    #[inline]
    pub fn serial_write(_: fmt::Arguments) {}
}

#[macro_export]
macro_rules! serial_trace {
    ($($arg:tt)*) => {{
        $crate::serial_fmt::serial_write(::core::format_args!($($arg)*));
    }};
}
