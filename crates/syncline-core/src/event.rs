//! Pipeline event model.
//!
//! Events are the unit of data exchanged between sources, processors, and
//! sinks. A source adapter creates an [`Event`] from an incoming change
//! notification; each processor stage produces a new event (clone + mutate,
//! never in-place across a stage boundary); the sink consumes the final
//! event and the instance is dropped.
//!
//! Processors and plugins must depend only on the [`PipelineEvent`] trait,
//! never on a concrete event type. This is the extension boundary.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Errors produced by the event model.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The raw payload could not be parsed as JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Sink semantics of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Upsert the entity identified by the primary keys.
    Write,
    /// Remove the entity identified by the primary keys.
    Delete,
}

/// One primary-key field of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkField {
    pub key: String,
    pub value: String,
}

impl PkField {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered primary-key fields. Order is preserved for display and logging;
/// use [`PipelineEvent::primary_key_map`] for lookups.
pub type PkFields = Vec<PkField>;

/// The capability set any concrete event type must support.
///
/// This is the only type processors and plugins are allowed to depend on.
pub trait PipelineEvent: Send + Sync + std::fmt::Debug {
    /// Ordered primary-key fields identifying the logical entity.
    fn primary_keys(&self) -> &PkFields;

    /// Tag identifying the event's schema/origin.
    fn event_type(&self) -> &str;

    /// Sink semantics for this event.
    fn operation(&self) -> Operation;

    /// Current raw payload bytes.
    fn raw(&self) -> &[u8];

    /// Replace the raw payload. Any previously parsed view is discarded.
    fn replace_raw(&mut self, raw: Vec<u8>);

    /// Parsed-JSON view of the raw payload, computed at most once per
    /// instance and invalidated by [`replace_raw`](Self::replace_raw).
    fn parsed(&self) -> Result<Arc<Value>, EventError>;

    /// Value-independent copy of this event.
    fn clone_event(&self) -> Box<dyn PipelineEvent>;

    /// Downcast support for adapters that require a concrete event type.
    fn as_any(&self) -> &dyn Any;

    /// Unordered view of the primary keys. Keys are unique; on duplicates
    /// the last field wins.
    fn primary_key_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for field in self.primary_keys() {
            map.insert(field.key.clone(), field.value.clone());
        }
        map
    }
}

/// The canonical event implementation used by the builtin sources and the
/// plugin wire protocol.
#[derive(Debug)]
pub struct Event {
    primary_keys: PkFields,
    event_type: String,
    operation: Operation,
    original_raw: Vec<u8>,
    /// Memoized parse of `original_raw`. Cleared on every raw replacement.
    parsed: Mutex<Option<Arc<Value>>>,
}

impl Event {
    pub fn new(
        event_type: impl Into<String>,
        primary_keys: PkFields,
        operation: Operation,
        raw: Vec<u8>,
    ) -> Self {
        Self {
            primary_keys,
            event_type: event_type.into(),
            operation,
            original_raw: raw,
            parsed: Mutex::new(None),
        }
    }

    /// Builder-style raw replacement, mainly for tests and source adapters.
    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.replace_raw(raw);
        self
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        // The parsed view is immutable behind an Arc, so sharing it between
        // the original and the clone is safe; the raw bytes are copied.
        Self {
            primary_keys: self.primary_keys.clone(),
            event_type: self.event_type.clone(),
            operation: self.operation,
            original_raw: self.original_raw.clone(),
            parsed: Mutex::new(self.parsed.lock().clone()),
        }
    }
}

impl PipelineEvent for Event {
    fn primary_keys(&self) -> &PkFields {
        &self.primary_keys
    }

    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn operation(&self) -> Operation {
        self.operation
    }

    fn raw(&self) -> &[u8] {
        &self.original_raw
    }

    fn replace_raw(&mut self, raw: Vec<u8>) {
        self.original_raw = raw;
        // Invalidate unconditionally: a stale parse of replaced bytes must
        // never be observable.
        *self.parsed.lock() = None;
    }

    fn parsed(&self) -> Result<Arc<Value>, EventError> {
        let mut cache = self.parsed.lock();
        if let Some(value) = cache.as_ref() {
            return Ok(Arc::clone(value));
        }
        let value = Arc::new(serde_json::from_slice::<Value>(&self.original_raw)?);
        *cache = Some(Arc::clone(&value));
        Ok(value)
    }

    fn clone_event(&self) -> Box<dyn PipelineEvent> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event::new(
            "user-activity",
            vec![PkField::new("tenant", "acme"), PkField::new("id", "42")],
            Operation::Write,
            br#"{"name":"alice","role":"admin"}"#.to_vec(),
        )
    }

    #[test]
    fn test_primary_key_map_last_wins() {
        let event = Event::new(
            "t",
            vec![
                PkField::new("id", "1"),
                PkField::new("region", "eu"),
                PkField::new("id", "2"),
            ],
            Operation::Write,
            b"{}".to_vec(),
        );

        // Order is preserved on the ordered view...
        assert_eq!(event.primary_keys()[0].value, "1");
        assert_eq!(event.primary_keys()[2].value, "2");

        // ...and the derived map keeps the last write.
        let map = event.primary_key_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("id"), Some(&"2".to_string()));
    }

    #[test]
    fn test_parsed_is_memoized() {
        let event = sample_event();
        let first = event.parsed().unwrap();
        let second = event.parsed().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first["name"], "alice");
    }

    #[test]
    fn test_replace_raw_invalidates_parsed() {
        let mut event = sample_event();
        let before = event.parsed().unwrap();
        assert_eq!(before["name"], "alice");

        event.replace_raw(br#"{"name":"bob"}"#.to_vec());
        let after = event.parsed().unwrap();
        assert_eq!(after["name"], "bob");
    }

    #[test]
    fn test_clone_is_value_independent() {
        let original = sample_event();
        let parsed_before = original.parsed().unwrap();

        let mut clone = original.clone();
        clone.replace_raw(br#"{"name":"mallory"}"#.to_vec());

        // Mutating the clone never changes the original, in raw bytes or in
        // the parsed view.
        assert_eq!(original.raw(), br#"{"name":"alice","role":"admin"}"#);
        assert_eq!(original.parsed().unwrap()["name"], "alice");
        assert!(Arc::ptr_eq(&parsed_before, &original.parsed().unwrap()));
        assert_eq!(clone.parsed().unwrap()["name"], "mallory");
    }

    #[test]
    fn test_parsed_rejects_invalid_json() {
        let event = Event::new("t", vec![], Operation::Write, b"not json".to_vec());
        let err = event.parsed().unwrap_err();
        assert!(matches!(err, EventError::InvalidPayload(_)));
    }

    #[test]
    fn test_operation_serde_round_trip() {
        let json = serde_json::to_string(&Operation::Delete).unwrap();
        assert_eq!(json, r#""delete""#);
        let back: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Operation::Delete);
    }
}
