//! # Subscription Engine - Single-Owner Poll Worker
//!
//! ## Purpose
//! Runs one background task that owns the broker consumer outright. Topic
//! subscriptions change at runtime, but every change travels as a message
//! over a channel and is applied by the worker between polls. No lock ever
//! guards the consumer and no other task touches broker subscription state.
//!
//! ## Behavior
//! - A changed topic set triggers a full resubscription: unsubscribe, then
//!   subscribe to the complete current set. Group offsets survive the cycle,
//!   so already-consumed records are not redelivered.
//! - With no registered handlers the worker parks on the command channel
//!   instead of polling.
//! - Polled records are grouped by topic and handed to that topic's handler
//!   in log order. A handler error is logged and never stops the worker.
//! - Broker errors back off for `retry_backoff` before the next poll.

use crate::broker::{Broker, BrokerConsumer, Record, StartOffset};
use crate::error::{BrokerError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-topic record batch handler.
///
/// Invoked once per poll with all records consumed from that topic, in log
/// order. Returning an error only produces a log line; delivery continues.
pub type TopicHandler = Arc<
    dyn Fn(&[Record]) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>
        + Send
        + Sync,
>;

/// Worker tuning knobs.
#[derive(Clone)]
pub struct EngineConfig {
    /// Consumer group the worker joins.
    pub group_id: String,
    /// Start position for topics without committed offsets.
    pub start: StartOffset,
    /// Maximum broker-side wait per poll.
    pub poll_timeout: Duration,
    /// Pause after a broker error before polling again.
    pub retry_backoff: Duration,
}

impl EngineConfig {
    pub fn new(group_id: impl Into<String>, start: StartOffset) -> Self {
        Self {
            group_id: group_id.into(),
            start,
            poll_timeout: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

enum Command {
    Subscribe { topic: String, handler: TopicHandler },
    Unsubscribe { topic: String },
    Stop,
}

/// Handle to the poll worker. Cheap to share behind an `Arc`.
pub struct SubscriptionEngine {
    tx: mpsc::UnboundedSender<Command>,
    topics: Arc<RwLock<BTreeSet<String>>>,
    positions: Arc<RwLock<HashMap<String, u64>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionEngine {
    /// Create the consumer and spawn the poll worker.
    pub fn start(broker: Arc<dyn Broker>, config: EngineConfig) -> Result<Self> {
        let consumer = broker.consumer(&config.group_id, config.start)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let topics = Arc::new(RwLock::new(BTreeSet::new()));
        let positions = Arc::new(RwLock::new(HashMap::new()));

        let worker_topics = topics.clone();
        let worker_positions = positions.clone();
        let handle = tokio::spawn(async move {
            Worker {
                consumer,
                rx,
                topics: worker_topics,
                positions: worker_positions,
                config,
                handlers: HashMap::new(),
            }
            .run()
            .await;
        });

        Ok(Self {
            tx,
            topics,
            positions,
            worker: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    /// Register a handler for a topic and add it to the subscription set.
    /// Subscribing to an already-subscribed topic is a no-op; the original
    /// handler stays in place.
    pub fn subscribe(&self, topic: impl Into<String>, handler: TopicHandler) -> Result<()> {
        self.send(Command::Subscribe {
            topic: topic.into(),
            handler,
        })
    }

    /// Remove a topic from the subscription set and drop its handler.
    pub fn unsubscribe(&self, topic: impl Into<String>) -> Result<()> {
        self.send(Command::Unsubscribe {
            topic: topic.into(),
        })
    }

    /// Snapshot of the topics the worker currently subscribes to.
    ///
    /// Updated by the worker after it applies a change, so a just-sent
    /// subscribe may not be visible yet.
    pub fn subscribed_topics(&self) -> BTreeSet<String> {
        self.topics.read().clone()
    }

    /// Consumer position for a topic, as of the last completed poll.
    ///
    /// The snapshot is written after handler dispatch, so a position at a
    /// topic's end offset means every earlier record has been handled.
    pub fn position(&self, topic: &str) -> Option<u64> {
        self.positions.read().get(topic).copied()
    }

    /// Stop the worker and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let _ = self.tx.send(Command::Stop);
            if let Err(e) = handle.await {
                warn!(error = %e, "Subscription worker exited abnormally");
            }
        }
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| BrokerError::Unavailable("subscription worker stopped".to_string()))
    }
}

struct Worker {
    consumer: Box<dyn BrokerConsumer>,
    rx: mpsc::UnboundedReceiver<Command>,
    topics: Arc<RwLock<BTreeSet<String>>>,
    positions: Arc<RwLock<HashMap<String, u64>>>,
    config: EngineConfig,
    handlers: HashMap<String, TopicHandler>,
}

impl Worker {
    async fn run(mut self) {
        let mut dirty = false;
        let mut running = true;

        while running {
            // Apply every queued change before touching the consumer.
            loop {
                match self.rx.try_recv() {
                    Ok(cmd) => running &= self.apply(cmd, &mut dirty),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        running = false;
                        break;
                    }
                }
            }
            if !running {
                break;
            }

            if dirty {
                match self.resubscribe().await {
                    Ok(()) => dirty = false,
                    Err(e) => {
                        warn!(error = %e, "Resubscription failed, backing off");
                        tokio::time::sleep(self.config.retry_backoff).await;
                        continue;
                    }
                }
            }

            if self.handlers.is_empty() {
                // Nothing to poll for; park until the next command.
                match self.rx.recv().await {
                    Some(cmd) => running &= self.apply(cmd, &mut dirty),
                    None => running = false,
                }
                continue;
            }

            match self.consumer.poll(self.config.poll_timeout).await {
                Ok(records) => {
                    if !records.is_empty() {
                        self.dispatch(records);
                    }
                    // Published after dispatch so a position snapshot never
                    // runs ahead of its handlers.
                    *self.positions.write() = self.consumer.positions();
                }
                Err(e) => {
                    warn!(error = %e, "Poll failed, backing off");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }

        if let Err(e) = self.consumer.unsubscribe().await {
            debug!(error = %e, "Unsubscribe on shutdown failed");
        }
        self.topics.write().clear();
        self.positions.write().clear();
        info!("Subscription worker stopped");
    }

    fn apply(&mut self, cmd: Command, dirty: &mut bool) -> bool {
        match cmd {
            Command::Subscribe { topic, handler } => {
                if self.handlers.contains_key(&topic) {
                    debug!(topic, "Already subscribed, keeping original handler");
                } else {
                    self.handlers.insert(topic.clone(), handler);
                    *dirty = true;
                    debug!(topic, "Handler registered");
                }
                true
            }
            Command::Unsubscribe { topic } => {
                if self.handlers.remove(&topic).is_some() {
                    *dirty = true;
                    debug!(topic, "Handler removed");
                }
                true
            }
            Command::Stop => false,
        }
    }

    async fn resubscribe(&mut self) -> Result<()> {
        self.consumer.unsubscribe().await?;
        let set: Vec<String> = self.handlers.keys().cloned().collect();
        if !set.is_empty() {
            self.consumer.subscribe(&set).await?;
        }
        info!(topics = ?set, "Subscription set replaced");
        *self.topics.write() = set.into_iter().collect();
        Ok(())
    }

    fn dispatch(&self, records: Vec<Record>) {
        let mut by_topic: HashMap<String, Vec<Record>> = HashMap::new();
        for record in records {
            by_topic.entry(record.topic.clone()).or_default().push(record);
        }

        for (topic, batch) in by_topic {
            match self.handlers.get(&topic) {
                Some(handler) => {
                    if let Err(e) = handler(&batch) {
                        warn!(topic, error = %e, "Topic handler failed");
                    }
                }
                // Unsubscribed between the poll and dispatch.
                None => debug!(topic, count = batch.len(), "Dropping records without handler"),
            }
        }
    }
}
