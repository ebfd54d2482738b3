use std::sync::OnceLock;

use chrono::Local;
use log::{Level, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

static LOGGER: OnceLock<ForwardingLogger> = OnceLock::new();

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub target: String,
    pub timestamp: String,
}

/// Writes to stderr and forwards every record to the host console, if one is attached.
pub struct ForwardingLogger {
    sink: Option<UnboundedSender<LogMessage>>,
    level: Level,
}

impl ForwardingLogger {
    pub fn new(level: Level, sink: Option<UnboundedSender<LogMessage>>) -> Self {
        Self { sink, level }
    }

    /// Installs the logger once per process. Falls back to `env_logger` when another logger
    /// already owns the `log` facade.
    pub fn init(level: Level, sink: Option<UnboundedSender<LogMessage>>) -> Result<(), SetLoggerError> {
        let logger = LOGGER.get_or_init(|| ForwardingLogger::new(level, sink));
        log::set_logger(logger).map(|()| log::set_max_level(level.to_level_filter()))
    }

    fn forward(&self, record: &Record) {
        let Some(sink) = &self.sink else {
            return;
        };
        let log_message = LogMessage {
            level: record.level().to_string(),
            message: record.args().to_string(),
            target: record.target().to_string(),
            timestamp: Local::now().to_rfc3339(),
        };

        // The host console may have gone away; stderr still has the line.
        if sink.send(log_message).is_err() {
            eprintln!("Failed to forward log message: console closed");
        }
    }
}

impl log::Log for ForwardingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
            self.forward(record);
        }
    }

    fn flush(&self) {}
}

/// Sets up logging for the process.
pub fn init(level: Level, sink: Option<UnboundedSender<LogMessage>>) {
    if ForwardingLogger::init(level, sink).is_err() {
        let _ = env_logger::builder()
            .filter_level(level.to_level_filter())
            .try_init();
    }
}
