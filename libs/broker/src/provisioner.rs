//! Idempotent topic and schema provisioning.
//!
//! Re-running provisioning against an already-prepared cluster is a no-op:
//! existing topics and already-registered schemas are treated as success.
//! The requested replication factor is capped to the live broker count so a
//! development cluster with fewer brokers still provisions, with a warning.

use crate::broker::{Broker, NewTopicSpec};
use crate::error::BrokerError;
use bridge_codec::{key_subject, value_subject, SchemaError, SchemaRegistry};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub const CLEANUP_POLICY_CONFIG: &str = "cleanup.policy";
pub const CLEANUP_POLICY_COMPACT: &str = "compact";

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Cluster metadata reports no live brokers; nothing can be created
    #[error("No live brokers available")]
    NoLiveBrokers,

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Schema registration failed for subject {subject}: {source}")]
    Schema {
        subject: String,
        source: SchemaError,
    },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// Creates topics and registers their schemas ahead of first use.
pub struct TopicProvisioner {
    broker: Arc<dyn Broker>,
    schemas: Arc<dyn SchemaRegistry>,
}

impl TopicProvisioner {
    pub fn new(broker: Arc<dyn Broker>, schemas: Arc<dyn SchemaRegistry>) -> Self {
        Self { broker, schemas }
    }

    /// Create a topic if it does not already exist.
    ///
    /// The effective replication factor is `min(desired, live brokers)`.
    pub async fn ensure_topic(&self, name: &str, partitions: u32, replication: u32) -> Result<()> {
        self.create(NewTopicSpec::new(name, partitions, replication))
            .await
    }

    /// Create a log-compacted topic if it does not already exist.
    pub async fn ensure_compacted_topic(
        &self,
        name: &str,
        partitions: u32,
        replication: u32,
    ) -> Result<()> {
        self.create(
            NewTopicSpec::new(name, partitions, replication)
                .with_config(CLEANUP_POLICY_CONFIG, CLEANUP_POLICY_COMPACT),
        )
        .await
    }

    /// Register key and value schemas for a topic under its canonical
    /// subject names. Already-registered schemas are left untouched.
    pub async fn ensure_schemas(
        &self,
        topic: &str,
        key_schema: &str,
        value_schema: &str,
    ) -> Result<()> {
        for (subject, schema) in [
            (key_subject(topic), key_schema),
            (value_subject(topic), value_schema),
        ] {
            self.schemas
                .register_if_missing(&subject, schema)
                .await
                .map_err(|source| ProvisionError::Schema {
                    subject: subject.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn create(&self, mut spec: NewTopicSpec) -> Result<()> {
        let live = self.broker.live_broker_count().await?;
        if live == 0 {
            return Err(ProvisionError::NoLiveBrokers);
        }

        if spec.replication_factor as usize > live {
            warn!(
                topic = %spec.name,
                requested = spec.replication_factor,
                live,
                "Capping replication factor to live broker count"
            );
            spec.replication_factor = live as u32;
        }

        match self.broker.create_topic(&spec).await {
            Ok(()) => {
                info!(topic = %spec.name, partitions = spec.partitions, "Topic created");
                Ok(())
            }
            Err(BrokerError::TopicExists(name)) => {
                info!(topic = %name, "Topic already exists, skipping creation");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
