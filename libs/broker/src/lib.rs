//! # Bridge Broker Layer - Pub/Sub Substrate and Provisioning
//!
//! ## Purpose
//! Everything the bridge core needs from the message broker, behind a small
//! trait seam: acknowledged publishing, group-based consumption with runtime
//! topic-set changes, admin topic creation, and idempotent schema
//! provisioning. An in-process broker implementation backs tests and the dev
//! binary; production deployments plug a real client behind the same traits.
//!
//! ## Architecture Role
//!
//! ```text
//! Publisher ──────────► Broker::publish (acked)
//! SubscriptionEngine ─► Broker::consumer ─► poll loop ─► per-topic handlers
//! TopicProvisioner ───► Broker::create_topic + SchemaRegistry
//! ```
//!
//! ## Concurrency Model
//! Each `SubscriptionEngine` owns exactly one background worker; subscription
//! changes arrive as messages over a channel and are applied by that worker
//! between polls, so the consumer's broker-level subscription state is only
//! ever touched from one task. Handler dispatch for a topic is serialized on
//! the worker; records are delivered in log order per topic.

pub mod broker;
pub mod error;
pub mod memory;
pub mod provisioner;
pub mod publisher;
pub mod subscription;

pub use broker::{Broker, BrokerConsumer, NewTopicSpec, Record, StartOffset};
pub use error::{BrokerError, Result};
pub use memory::InMemoryBroker;
pub use provisioner::{
    ProvisionError, TopicProvisioner, CLEANUP_POLICY_COMPACT, CLEANUP_POLICY_CONFIG,
};
pub use publisher::Publisher;
pub use subscription::{EngineConfig, SubscriptionEngine, TopicHandler};
