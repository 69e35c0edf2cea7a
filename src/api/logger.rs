//! A `log` backend that forwards records to the host as Log frames.
//!
//! The child process has no terminal of its own; everything it wants seen
//! ends up on the pipe. Filtering reuses env_logger's filter syntax so the
//! usual `module=debug` specs work.

use crate::messages::LogRecord;
use crate::transport::{MessageType, MessageWriter};
use chrono::Utc;
use env_logger::filter::{self, Filter};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

pub struct PipeLoggerBuilder {
    filter: filter::Builder,
    writer: MessageWriter,
}

impl PipeLoggerBuilder {
    pub fn new(writer: MessageWriter) -> PipeLoggerBuilder {
        PipeLoggerBuilder {
            filter: filter::Builder::new(),
            writer,
        }
    }

    pub fn filter_level(&mut self, level: LevelFilter) -> &mut Self {
        self.filter.filter_level(level);
        self
    }

    pub fn filter_module(&mut self, module: &str, level: LevelFilter) -> &mut Self {
        self.filter.filter_module(module, level);
        self
    }

    /// Parses an env_logger-style filter spec, e.g. `info,my_plugin=debug`.
    pub fn parse(&mut self, filters: &str) -> &mut Self {
        self.filter.parse(filters);
        self
    }

    pub fn try_init(&mut self) -> Result<(), SetLoggerError> {
        let logger = PipeLogger {
            filter: self.filter.build(),
            writer: self.writer.clone(),
        };

        log::set_max_level(logger.filter.filter());
        log::set_boxed_logger(Box::new(logger))
    }
}

struct PipeLogger {
    filter: Filter,
    writer: MessageWriter,
}

impl Log for PipeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.filter.matches(record) {
            return;
        }

        let now = Utc::now();
        let payload = LogRecord {
            message: format!("{}", record.args()),
            logger: record.target().to_string(),
            source_path: record.file().map(str::to_string),
            lineno: record.line(),
            created: now.timestamp() as f64
                + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0,
            level: level_name(record.level()).to_string(),
        };

        // A write failure here has nowhere useful to report itself.
        let _ = self.writer.write(MessageType::Log, &payload);
    }

    fn flush(&self) {}
}

/// Host-side log tooling expects the long form of the warning level.
fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug | Level::Trace => "DEBUG",
    }
}
