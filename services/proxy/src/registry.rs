//! # Service Registry - Compacted-Topic Replicated Map
//!
//! ## Purpose
//! Mirrors the compacted registry topic into an in-memory map of
//! registrations. Writes go through the broker, never directly into the
//! mirror; the mirror only changes when the write replays back through the
//! poll worker, so every instance converges on the same state regardless of
//! who wrote what.
//!
//! ## Startup
//! `start()` provisions the compacted topic and its schemas, captures the
//! topic's end offset, subscribes from the earliest offset and blocks until
//! replay reaches that captured offset. After `start()` returns, the mirror
//! reflects every registration written before startup.

use crate::config::ProxyConfig;
use bridge_broker::{
    Broker, BrokerError, EngineConfig, ProvisionError, Publisher, Record, StartOffset,
    SubscriptionEngine, TopicProvisioner,
};
use bridge_codec::{registration_key_schema, registration_value_schema, SchemaRegistry};
use bridge_types::{Registration, RegistrationKey};
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The poll worker stopped before replay reached the end offset
    #[error("Registry replay interrupted before reaching readiness")]
    ReplayInterrupted,
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// One observed registry mutation: `None` means the key was retracted.
pub type RegistryChange = (RegistrationKey, Option<Registration>);

/// Invoked once per polled batch with every change applied to the mirror.
pub type ChangeListener = Arc<dyn Fn(&[RegistryChange]) + Send + Sync>;

/// Replicated registration map backed by a compacted topic.
pub struct ServiceRegistry {
    topic: String,
    partitions: u32,
    replication: u32,
    engine: SubscriptionEngine,
    publisher: Publisher,
    broker: Arc<dyn Broker>,
    provisioner: TopicProvisioner,
    mirror: Arc<DashMap<RegistrationKey, Registration>>,
    listener: Arc<parking_lot::RwLock<Option<ChangeListener>>>,
}

impl ServiceRegistry {
    pub fn new(
        broker: Arc<dyn Broker>,
        schemas: Arc<dyn SchemaRegistry>,
        config: &ProxyConfig,
    ) -> Result<Self> {
        let engine = SubscriptionEngine::start(
            broker.clone(),
            EngineConfig::new(config.registry_group(), StartOffset::Earliest),
        )?;

        Ok(Self {
            topic: config.registry.topic.clone(),
            partitions: config.provisioning.partitions,
            replication: config.provisioning.replication_factor,
            engine,
            publisher: Publisher::new(broker.clone()),
            provisioner: TopicProvisioner::new(broker.clone(), schemas),
            broker,
            mirror: Arc::new(DashMap::new()),
            listener: Arc::new(parking_lot::RwLock::new(None)),
        })
    }

    /// Install the change listener. Must happen before `start()` so replay
    /// changes are observed too.
    pub fn set_change_listener(&self, listener: Option<ChangeListener>) {
        *self.listener.write() = listener;
    }

    /// Provision the topic, subscribe, and replay to the end offset
    /// captured at this moment before returning.
    pub async fn start(&self) -> Result<()> {
        self.provisioner
            .ensure_compacted_topic(&self.topic, self.partitions, self.replication)
            .await?;
        self.provisioner
            .ensure_schemas(
                &self.topic,
                &registration_key_schema(),
                &registration_value_schema(),
            )
            .await?;

        let end = self.broker.end_offset(&self.topic).await?;
        self.engine
            .subscribe(self.topic.as_str(), self.mirror_handler())?;

        // Readiness is position-based: the consumer position advances past
        // compacted-away offsets too, so it converges on the captured end
        // offset even when the log has gaps that record offsets never fill.
        let mut subscribed = false;
        while self.engine.position(&self.topic).unwrap_or(0) < end {
            let active = self.engine.subscribed_topics().contains(&self.topic);
            if subscribed && !active {
                return Err(RegistryError::ReplayInterrupted);
            }
            subscribed = subscribed || active;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        info!(
            topic = %self.topic,
            registrations = self.mirror.len(),
            "Registry mirror ready"
        );
        Ok(())
    }

    /// Publish a registration. The mirror updates when the record replays
    /// back through the poll worker.
    pub async fn register(&self, registration: Registration) -> Result<()> {
        let key = serde_json::to_value(registration.key())?;
        let value = serde_json::to_value(&registration)?;
        self.publisher.send(&self.topic, Some(key), Some(value)).await?;
        info!(name = registration.name(), "Registration published");
        Ok(())
    }

    /// Publish a tombstone for a registration name.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        self.publisher
            .send_tombstone(&self.topic, json!({ "name": name }))
            .await?;
        info!(name, "Registration retracted");
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.mirror.contains_key(&RegistrationKey::new(name))
    }

    pub fn get(&self, name: &str) -> Option<Registration> {
        self.mirror
            .get(&RegistrationKey::new(name))
            .map(|entry| entry.value().clone())
    }

    pub fn all(&self) -> Vec<Registration> {
        self.mirror.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.is_empty()
    }

    /// Stop the poll worker. Pending mirror state stays readable.
    pub async fn close(&self) {
        self.engine.stop().await;
        info!(topic = %self.topic, "Registry mirror closed");
    }

    fn mirror_handler(&self) -> bridge_broker::TopicHandler {
        let mirror = self.mirror.clone();
        let listener = self.listener.clone();

        Arc::new(move |records: &[Record]| {
            let mut changes: Vec<RegistryChange> = Vec::with_capacity(records.len());

            for record in records {
                let Some(key_value) = &record.key else {
                    warn!(offset = record.offset, "Registry record without a key, skipping");
                    continue;
                };
                let key: RegistrationKey = match serde_json::from_value(key_value.clone()) {
                    Ok(key) => key,
                    Err(e) => {
                        warn!(offset = record.offset, error = %e, "Unparseable registry key, skipping");
                        continue;
                    }
                };

                match &record.value {
                    None => {
                        if mirror.remove(&key).is_some() {
                            debug!(name = %key.name, "Registration removed from mirror");
                        }
                        changes.push((key, None));
                    }
                    Some(value) => match serde_json::from_value::<Registration>(value.clone()) {
                        Ok(registration) => {
                            mirror.insert(key.clone(), registration.clone());
                            changes.push((key, Some(registration)));
                        }
                        Err(e) => {
                            warn!(name = %key.name, error = %e, "Unparseable registration value, skipping");
                        }
                    },
                }
            }

            if !changes.is_empty() {
                let callback = listener.read().clone();
                if let Some(callback) = callback {
                    callback(&changes);
                }
            }
            Ok(())
        })
    }
}
