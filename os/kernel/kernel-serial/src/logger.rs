use crate::serial_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::sync::OnceLock;

static LOGGER: OnceLock<SerialLogger> = OnceLock::new();

pub struct SerialLogger {
    max_level: LevelFilter,
}

impl SerialLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install as the global logger.
    ///
    /// # Errors
    /// If a logger (this one or any other) is already installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        let max_level = self.max_level;
        let logger = LOGGER.get_or_init(|| self);
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(())
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        serial_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use log::Level;

    #[test]
    fn filters_by_level() {
        let logger = SerialLogger::new(LevelFilter::Info);
        let meta = |level| Metadata::builder().level(level).target("kernel").build();
        assert!(logger.enabled(&meta(Level::Error)));
        assert!(logger.enabled(&meta(Level::Info)));
        assert!(!logger.enabled(&meta(Level::Debug)));
    }

    #[test]
    fn second_install_is_rejected() {
        let first = SerialLogger::new(LevelFilter::Warn).init();
        let second = SerialLogger::new(LevelFilter::Trace).init();
        assert!(first.is_ok());
        assert!(second.is_err());
    }
}
