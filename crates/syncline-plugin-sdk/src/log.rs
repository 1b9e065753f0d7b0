//! Guest-side logging.
//!
//! Plugins must not write free-form text to stdout — that stream carries
//! the RPC frames. These helpers emit structured lines on stderr in the
//! format the host's log bridge understands, so plugin logs show up in the
//! agent's output with correct levels.

use serde_json::Map;

use crate::{LogLevel, LogRecord};

/// Emit one structured log line on stderr.
pub fn emit(level: LogLevel, message: impl Into<String>) {
    let record = LogRecord {
        level,
        message: message.into(),
        timestamp: Some(chrono::Utc::now()),
        fields: Map::new(),
    };
    if let Ok(line) = serde_json::to_string(&record) {
        eprintln!("{line}");
    }
}

pub fn trace(message: impl Into<String>) {
    emit(LogLevel::Trace, message);
}

pub fn debug(message: impl Into<String>) {
    emit(LogLevel::Debug, message);
}

pub fn info(message: impl Into<String>) {
    emit(LogLevel::Info, message);
}

pub fn warn(message: impl Into<String>) {
    emit(LogLevel::Warn, message);
}

pub fn error(message: impl Into<String>) {
    emit(LogLevel::Error, message);
}
