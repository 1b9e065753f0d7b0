//! Sink interface.
//!
//! Concrete sink adapters (document stores, warehouses) live outside this
//! crate; the pipeline only depends on this trait. Writes are assumed
//! idempotent — the agent offers at-least-once delivery, and replays must
//! converge at the sink.

use std::collections::BTreeMap;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::event::{PipelineEvent, PkFields};

/// Sink write errors.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The event has no primary keys; identity-keyed sinks cannot place it.
    #[error("event of type {0} has no primary keys")]
    MissingIdentity(String),

    /// The underlying store rejected the write.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Destination for fully processed events.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Upsert the entity described by `event`.
    async fn write_data(&self, event: &dyn PipelineEvent) -> Result<(), SinkError>;

    /// Remove the entity described by `event`.
    async fn delete(&self, event: &dyn PipelineEvent) -> Result<(), SinkError>;
}

/// Sink identity of an event: the primary-key map in a stable order.
pub fn identity_key(event_type: &str, primary_keys: &PkFields) -> Option<String> {
    if primary_keys.is_empty() {
        return None;
    }
    let mut map = BTreeMap::new();
    for field in primary_keys {
        map.insert(field.key.as_str(), field.value.as_str());
    }
    let joined = map
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    Some(format!("{event_type}:{joined}"))
}

/// In-memory sink used by tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: RwLock<HashMap<String, Value>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.records.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn write_data(&self, event: &dyn PipelineEvent) -> Result<(), SinkError> {
        let key = identity_key(event.event_type(), event.primary_keys())
            .ok_or_else(|| SinkError::MissingIdentity(event.event_type().to_string()))?;
        let value = serde_json::from_slice::<Value>(event.raw())
            .map_err(|e| SinkError::Storage(format!("payload is not a document: {e}")))?;
        self.records.write().await.insert(key, value);
        Ok(())
    }

    async fn delete(&self, event: &dyn PipelineEvent) -> Result<(), SinkError> {
        let key = identity_key(event.event_type(), event.primary_keys())
            .ok_or_else(|| SinkError::MissingIdentity(event.event_type().to_string()))?;
        self.records.write().await.remove(&key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Operation, PkField};

    fn event(op: Operation) -> Event {
        Event::new(
            "device",
            vec![PkField::new("site", "eu"), PkField::new("id", "9")],
            op,
            br#"{"status":"online"}"#.to_vec(),
        )
    }

    #[test]
    fn test_identity_key_is_order_insensitive() {
        let a = identity_key(
            "device",
            &vec![PkField::new("site", "eu"), PkField::new("id", "9")],
        );
        let b = identity_key(
            "device",
            &vec![PkField::new("id", "9"), PkField::new("site", "eu")],
        );
        assert_eq!(a, b);
        assert_eq!(a.unwrap(), "device:id=9,site=eu");
    }

    #[tokio::test]
    async fn test_write_then_delete() {
        let sink = MemorySink::new();
        sink.write_data(&event(Operation::Write)).await.unwrap();
        assert_eq!(sink.len().await, 1);

        sink.delete(&event(Operation::Delete)).await.unwrap();
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_empty_primary_keys_are_rejected() {
        let sink = MemorySink::new();
        let anonymous = Event::new("audit", vec![], Operation::Write, b"{}".to_vec());
        let err = sink.write_data(&anonymous).await.unwrap_err();
        assert!(matches!(err, SinkError::MissingIdentity(_)));
    }
}
