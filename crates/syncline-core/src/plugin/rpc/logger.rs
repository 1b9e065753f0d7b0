//! Bridges guest log output into the host's `tracing` output.
//!
//! The guest writes structured JSON lines on stderr (see
//! [`LogRecord`](super::protocol::LogRecord)); the bridge re-emits each one
//! through `tracing` at the mapped level so plugin logs merge with host
//! logs. The level threshold is owned by the bridge instance — two plugin
//! hosts with different verbosity can coexist in one process.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tracing::{debug, error, info, trace, warn};

use super::protocol::{LogLevel, LogRecord};

/// Per-plugin log forwarding with an instance-owned level threshold.
#[derive(Debug, Clone)]
pub struct LogBridge {
    plugin: String,
    threshold: LogLevel,
}

impl LogBridge {
    pub fn new(plugin: impl Into<String>, threshold: LogLevel) -> Self {
        Self {
            plugin: plugin.into(),
            threshold,
        }
    }

    /// Would a line at `level` be forwarded?
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.threshold
    }

    pub fn is_trace(&self) -> bool {
        self.enabled(LogLevel::Trace)
    }

    pub fn is_debug(&self) -> bool {
        self.enabled(LogLevel::Debug)
    }

    pub fn is_info(&self) -> bool {
        self.enabled(LogLevel::Info)
    }

    pub fn is_warn(&self) -> bool {
        self.enabled(LogLevel::Warn)
    }

    pub fn is_error(&self) -> bool {
        self.enabled(LogLevel::Error)
    }

    /// Re-emit one guest record through `tracing`.
    pub fn emit(&self, record: &LogRecord) {
        if !self.enabled(record.level) {
            return;
        }
        let fields = if record.fields.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&record.fields).unwrap_or_default()
        };
        match record.level {
            LogLevel::Trace => trace!(plugin = %self.plugin, %fields, "{}", record.message),
            LogLevel::Debug => debug!(plugin = %self.plugin, %fields, "{}", record.message),
            LogLevel::Info => info!(plugin = %self.plugin, %fields, "{}", record.message),
            LogLevel::Warn => warn!(plugin = %self.plugin, %fields, "{}", record.message),
            LogLevel::Error => error!(plugin = %self.plugin, %fields, "{}", record.message),
        }
    }

    /// Drain the child's stderr until it closes. Lines that are not valid
    /// records pass through at debug level so raw guest output is never
    /// lost.
    pub async fn run(self, stderr: ChildStderr) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match serde_json::from_str::<LogRecord>(&line) {
                Ok(record) => self.emit(&record),
                Err(_) => {
                    if self.is_debug() {
                        debug!(plugin = %self.plugin, "{line}");
                    }
                }
            }
        }
        trace!(plugin = %self.plugin, "plugin stderr closed");
    }
}
