//! Acknowledged record publishing.

use crate::broker::Broker;
use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// Thin publishing facade over a broker handle.
///
/// Every send awaits the broker's acknowledgement before returning, so a
/// returned `Ok` means the record is durably appended. Clones share the
/// underlying broker connection.
#[derive(Clone)]
pub struct Publisher {
    broker: Arc<dyn Broker>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Publish a keyed record and wait for the acknowledgement.
    pub async fn send(
        &self,
        topic: &str,
        key: Option<Value>,
        value: Option<Value>,
    ) -> Result<u64> {
        let offset = self.broker.publish(topic, key, value).await?;
        trace!(topic, offset, "Record acknowledged");
        Ok(offset)
    }

    /// Publish a tombstone for a key on a compacted topic.
    pub async fn send_tombstone(&self, topic: &str, key: Value) -> Result<u64> {
        self.send(topic, Some(key), None).await
    }
}
