//! Kernel log backend for the `log` facade
//!
//! The IPC core only emits `log` records. Whoever boots the kernel installs
//! this logger once with a sink (serial port, console ring buffer) and a
//! level; each record is formatted into a fixed buffer and handed to the
//! sink as one line.

use core::fmt::Write;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use spin::Once;

/// Longest line handed to the sink; longer records are cut short
pub const LINE_MAX: usize = 256;

/// Formatted log line
pub type LogLine = heapless::String<LINE_MAX>;

/// Where log lines go
pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

struct KernelLogger {
    sink: Once<&'static dyn LogSink>,
}

static LOGGER: KernelLogger = KernelLogger { sink: Once::new() };

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Some(sink) = self.sink.get() {
            sink.write_line(&format_record(record));
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Fails if a logger is already set.
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.sink.call_once(|| sink);
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// `[LEVEL] target: message`, truncated to [`LINE_MAX`]
pub fn format_record(record: &Record) -> LogLine {
    let mut line = LogLine::new();
    // A full buffer just ends the line early
    let _ = write!(
        line,
        "[{}] {}: {}",
        level_tag(record.level()),
        record.target(),
        record.args()
    );
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_record() {
        let line = format_record(
            &Record::builder()
                .level(Level::Warn)
                .target("quantum_ipc::ipc")
                .args(format_args!("queue {} full", 7))
                .build(),
        );
        assert_eq!(line.as_str(), "[WARN] quantum_ipc::ipc: queue 7 full");
    }

    #[test]
    fn test_long_record_truncated() {
        let long = "x".repeat(LINE_MAX * 2);
        let line = format_record(
            &Record::builder()
                .level(Level::Trace)
                .target("t")
                .args(format_args!("{}", long))
                .build(),
        );
        assert!(line.len() <= LINE_MAX);
        assert!(line.starts_with("[TRACE] t: "));
    }
}
