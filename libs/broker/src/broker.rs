//! Broker collaborator traits and record types.
//!
//! The bridge core only needs four primitives from the broker: acknowledged
//! publish, admin topic creation, live broker introspection, and group-based
//! consumption with a replaceable topic set. Keys and values are JSON on the
//! wire; a `None` value is a tombstone on compacted topics.

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// A consumed record with its position in the topic's log.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    pub offset: u64,
    pub key: Option<Value>,
    pub value: Option<Value>,
}

impl Record {
    /// Tombstone records carry no value and signal deletion of their key.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// Admin request to create a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTopicSpec {
    pub name: String,
    pub partitions: u32,
    pub replication_factor: u32,
    pub configs: HashMap<String, String>,
}

impl NewTopicSpec {
    pub fn new(name: impl Into<String>, partitions: u32, replication_factor: u32) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            configs: HashMap::new(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(key.into(), value.into());
        self
    }
}

/// Where a consumer group without committed offsets starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Replay the topic from the beginning (registry mirrors).
    Earliest,
    /// Only records published after subscription (response routing).
    Latest,
}

/// Broker primitives required by the bridge core.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Number of currently live brokers; zero means provisioning must fail.
    async fn live_broker_count(&self) -> Result<usize>;

    /// Create a topic. An existing topic surfaces as `TopicExists`.
    async fn create_topic(&self, spec: &NewTopicSpec) -> Result<()>;

    /// Offset one past the last record of a topic (0 for empty/unknown).
    async fn end_offset(&self, topic: &str) -> Result<u64>;

    /// Publish a record and wait for the broker's acknowledgement.
    /// Returns the assigned offset.
    async fn publish(
        &self,
        topic: &str,
        key: Option<Value>,
        value: Option<Value>,
    ) -> Result<u64>;

    /// Create a consumer bound to a consumer group.
    fn consumer(&self, group_id: &str, start: StartOffset) -> Result<Box<dyn BrokerConsumer>>;
}

/// A group-based consumer with a replaceable topic subscription.
///
/// Group offsets survive `unsubscribe`/`subscribe` cycles so a full
/// resubscription of a changed topic set does not redeliver records.
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Replace the subscription with the given topic set.
    async fn subscribe(&mut self, topics: &[String]) -> Result<()>;

    /// Drop all broker-level subscriptions.
    async fn unsubscribe(&mut self) -> Result<()>;

    /// Poll for new records, waiting at most `timeout`.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>>;

    /// Topics currently subscribed at the broker level.
    fn subscription(&self) -> Vec<String>;

    /// Next offset this consumer will read, per subscribed topic.
    ///
    /// Advanced by `poll` past compacted-away offsets too, so reaching a
    /// topic's end offset means everything before it was observed even when
    /// fewer records were delivered.
    fn positions(&self) -> HashMap<String, u64>;
}
