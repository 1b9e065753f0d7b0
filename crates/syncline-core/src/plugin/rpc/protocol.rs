//! Wire protocol shared by the RPC plugin host and guest.
//!
//! The transport is a single bidirectional stream of newline-delimited JSON
//! frames over the child process's stdin/stdout. Before any application
//! frame, the guest writes one [`Handshake`] line; after the host has
//! verified it, requests flow host-to-guest and responses guest-to-host,
//! one call in flight at a time.
//!
//! Method and service names are part of the wire contract and must not be
//! changed: existing plugin binaries match on them verbatim.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::event::{Event, Operation, PipelineEvent, PkFields};

/// Protocol version spoken by this host/SDK build.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable (and handshake field) carrying the magic cookie.
pub const MAGIC_COOKIE_KEY: &str = "SYNCLINE_PLUGIN_COOKIE";

/// Expected cookie value. A basic "this executable really is a plugin"
/// check, not a security boundary.
pub const MAGIC_COOKIE_VALUE: &str = "ba5c7f62-8c14-4a30-9f05-syncline-processor";

/// The single service a processor plugin exposes.
pub const PROCESSOR_SERVICE: &str = "processor";

pub const METHOD_DISPENSE: &str = "Dispense";
pub const METHOD_PROCESS: &str = "Process";
pub const METHOD_INIT: &str = "Init";

/// First line written by the guest on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub protocol_version: u32,
    pub cookie_key: String,
    pub cookie_value: String,
}

impl Handshake {
    /// The handshake this build expects (and emits, on the guest side).
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            cookie_key: MAGIC_COOKIE_KEY.to_string(),
            cookie_value: MAGIC_COOKIE_VALUE.to_string(),
        }
    }

    /// Check a received handshake against the fixed expected values.
    pub fn verify(&self) -> std::result::Result<(), String> {
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(format!(
                "protocol version mismatch: guest speaks {}, host expects {PROTOCOL_VERSION}",
                self.protocol_version
            ));
        }
        if self.cookie_key != MAGIC_COOKIE_KEY || self.cookie_value != MAGIC_COOKIE_VALUE {
            return Err(
                "magic cookie mismatch: the target executable is not a syncline plugin".to_string(),
            );
        }
        Ok(())
    }
}

/// A host-to-guest call frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A guest-to-host reply frame. Exactly one of `result` / `error` is
/// meaningful; a null `result` on `Process` is the discard signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Self {
            id,
            result,
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            result: Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Wire representation of an event. All four fields round-trip exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub primary_keys: PkFields,
    #[serde(rename = "type")]
    pub event_type: String,
    pub operation: Operation,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl WireEvent {
    /// Capture any pipeline event for transmission. Only the capability-set
    /// fields cross the wire; memoized parse state does not.
    pub fn from_event(event: &dyn PipelineEvent) -> Self {
        Self {
            primary_keys: event.primary_keys().clone(),
            event_type: event.event_type().to_string(),
            operation: event.operation(),
            payload: event.raw().to_vec(),
        }
    }

    pub fn into_event(self) -> Event {
        Event::new(
            self.event_type,
            self.primary_keys,
            self.operation,
            self.payload,
        )
    }
}

/// Severity of a guest log line, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

/// A structured log line emitted by the guest on stderr.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
