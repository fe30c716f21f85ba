//! # Broker Error Types
//!
//! Error categories for the broker collaborator and the components built on
//! top of it. Provisioning has its own error type in `provisioner`.

use thiserror::Error;

/// Broker operation errors
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Topic creation hit an existing topic; provisioning treats this as success
    #[error("Topic already exists: {0}")]
    TopicExists(String),

    /// Publish or consume against a topic the broker does not know
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// Requested replication exceeds the live broker count
    #[error("Replication factor {requested} exceeds live broker count {live}")]
    InvalidReplicationFactor { requested: u32, live: usize },

    /// Publish was not acknowledged
    #[error("Publish to topic {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Consumer subscribe/poll failure
    #[error("Consumer error: {0}")]
    Consumer(String),

    /// Broker unreachable or shutting down
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;
