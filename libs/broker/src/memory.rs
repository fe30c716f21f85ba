//! In-process broker implementation.
//!
//! Single-partition append-only log per topic with notify-based poll wakeup.
//! Used by tests and the dev binary; semantics follow the broker trait
//! contract, including tombstones and on-demand log compaction so registry
//! replay behavior can be exercised without a real cluster.

use crate::broker::{Broker, BrokerConsumer, NewTopicSpec, Record, StartOffset};
use crate::error::{BrokerError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
struct StoredRecord {
    offset: u64,
    key: Option<Value>,
    value: Option<Value>,
}

#[derive(Debug)]
struct TopicLog {
    spec: NewTopicSpec,
    records: Vec<StoredRecord>,
    next_offset: u64,
}

impl TopicLog {
    fn new(spec: NewTopicSpec) -> Self {
        Self {
            spec,
            records: Vec::new(),
            next_offset: 0,
        }
    }
}

#[derive(Debug)]
struct Inner {
    topics: Mutex<HashMap<String, TopicLog>>,
    notify: Notify,
    live_brokers: usize,
    auto_create: bool,
}

/// In-memory broker backing tests and local development.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl InMemoryBroker {
    /// Broker with one simulated live node and topic auto-creation.
    pub fn new() -> Self {
        Self::with_live_brokers(1)
    }

    /// Broker simulating a cluster of `live_brokers` nodes.
    pub fn with_live_brokers(live_brokers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                notify: Notify::new(),
                live_brokers,
                auto_create: true,
            }),
        }
    }

    /// Compact a topic: keep only the latest record per serialized key and
    /// drop tombstones, i.e. the state after delete retention has elapsed.
    /// Offsets of surviving records are preserved.
    pub fn compact(&self, topic: &str) {
        let mut topics = self.inner.topics.lock();
        let Some(log) = topics.get_mut(topic) else {
            return;
        };

        let mut latest: HashMap<String, usize> = HashMap::new();
        for (idx, record) in log.records.iter().enumerate() {
            let key = record
                .key
                .as_ref()
                .map(|k| k.to_string())
                .unwrap_or_default();
            latest.insert(key, idx);
        }

        let keep: Vec<usize> = latest.into_values().collect();
        let mut compacted: Vec<StoredRecord> = log
            .records
            .drain(..)
            .enumerate()
            .filter(|(idx, record)| keep.contains(idx) && record.value.is_some())
            .map(|(_, record)| record)
            .collect();
        compacted.sort_by_key(|r| r.offset);
        debug!(topic, retained = compacted.len(), "Compacted topic log");
        log.records = compacted;
    }

    /// Retained record count for a topic (post-compaction visibility).
    pub fn record_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|log| log.records.len())
            .unwrap_or(0)
    }

    /// Configuration of a created topic, if present.
    pub fn topic_spec(&self, topic: &str) -> Option<NewTopicSpec> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|log| log.spec.clone())
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn live_broker_count(&self) -> Result<usize> {
        Ok(self.inner.live_brokers)
    }

    async fn create_topic(&self, spec: &NewTopicSpec) -> Result<()> {
        if spec.replication_factor as usize > self.inner.live_brokers {
            return Err(BrokerError::InvalidReplicationFactor {
                requested: spec.replication_factor,
                live: self.inner.live_brokers,
            });
        }

        let mut topics = self.inner.topics.lock();
        if topics.contains_key(&spec.name) {
            return Err(BrokerError::TopicExists(spec.name.clone()));
        }
        topics.insert(spec.name.clone(), TopicLog::new(spec.clone()));
        Ok(())
    }

    async fn end_offset(&self, topic: &str) -> Result<u64> {
        Ok(self
            .inner
            .topics
            .lock()
            .get(topic)
            .map(|log| log.next_offset)
            .unwrap_or(0))
    }

    async fn publish(
        &self,
        topic: &str,
        key: Option<Value>,
        value: Option<Value>,
    ) -> Result<u64> {
        let offset = {
            let mut topics = self.inner.topics.lock();
            let log = match topics.get_mut(topic) {
                Some(log) => log,
                None if self.inner.auto_create => topics
                    .entry(topic.to_string())
                    .or_insert_with(|| TopicLog::new(NewTopicSpec::new(topic, 1, 1))),
                None => return Err(BrokerError::UnknownTopic(topic.to_string())),
            };

            let offset = log.next_offset;
            log.next_offset += 1;
            log.records.push(StoredRecord { offset, key, value });
            offset
        };

        self.inner.notify.notify_waiters();
        Ok(offset)
    }

    fn consumer(&self, group_id: &str, start: StartOffset) -> Result<Box<dyn BrokerConsumer>> {
        Ok(Box::new(InMemoryConsumer {
            inner: self.inner.clone(),
            group_id: group_id.to_string(),
            start,
            subscription: Vec::new(),
            positions: HashMap::new(),
        }))
    }
}

struct InMemoryConsumer {
    inner: Arc<Inner>,
    #[allow(dead_code)]
    group_id: String,
    start: StartOffset,
    subscription: Vec<String>,
    // Group positions survive unsubscribe/resubscribe cycles.
    positions: HashMap<String, u64>,
}

impl InMemoryConsumer {
    fn fetch(&mut self) -> Vec<Record> {
        let topics = self.inner.topics.lock();
        let mut records = Vec::new();

        for topic in &self.subscription {
            let Some(log) = topics.get(topic) else {
                continue;
            };
            let position = self.positions.entry(topic.clone()).or_insert(0);
            for stored in log.records.iter().filter(|r| r.offset >= *position) {
                records.push(Record {
                    topic: topic.clone(),
                    offset: stored.offset,
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                });
            }
            *position = log.next_offset;
        }

        records
    }
}

#[async_trait]
impl BrokerConsumer for InMemoryConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<()> {
        let logs = self.inner.topics.lock();
        for topic in topics {
            self.positions.entry(topic.clone()).or_insert_with(|| {
                match self.start {
                    StartOffset::Earliest => 0,
                    StartOffset::Latest => {
                        logs.get(topic).map(|log| log.next_offset).unwrap_or(0)
                    }
                }
            });
        }
        drop(logs);

        self.subscription = topics.to_vec();
        Ok(())
    }

    async fn unsubscribe(&mut self) -> Result<()> {
        self.subscription.clear();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>> {
        let deadline = Instant::now() + timeout;
        // Wait on a local handle so the guard does not pin `self` while
        // fetch needs it mutably.
        let inner = self.inner.clone();

        loop {
            // Register for wakeup before checking so a publish between the
            // check and the await cannot be missed.
            let notified = inner.notify.notified();

            let records = self.fetch();
            if !records.is_empty() {
                return Ok(records);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(self.fetch());
                }
            }
        }
    }

    fn subscription(&self) -> Vec<String> {
        self.subscription.clone()
    }

    fn positions(&self) -> HashMap<String, u64> {
        self.subscription
            .iter()
            .filter_map(|topic| {
                self.positions
                    .get(topic)
                    .map(|offset| (topic.clone(), *offset))
            })
            .collect()
    }
}
