//! Schema registry collaborator.
//!
//! Subjects follow the topic name strategy: `<topic>-key` and
//! `<topic>-value`. The registry is opaque to the core; only latest-schema
//! fetch and idempotent registration are required.

use crate::error::{Result, SchemaError};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Subject carrying a topic's key schema.
pub fn key_subject(topic: &str) -> String {
    format!("{topic}-key")
}

/// Subject carrying a topic's value schema.
pub fn value_subject(topic: &str) -> String {
    format!("{topic}-value")
}

/// Schema registry operations required by the bridge core.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Fetch the latest schema text registered under a subject.
    async fn latest_schema(&self, subject: &str) -> Result<String>;

    /// Register a schema under a subject unless one is already present.
    /// Returns the schema id (existing or newly assigned).
    async fn register_if_missing(&self, subject: &str, schema: &str) -> Result<u32>;
}

/// In-process schema registry used by tests and the dev binary.
///
/// Versions accumulate per subject; `latest_schema` returns the most recent.
#[derive(Debug, Default)]
pub struct InMemorySchemaRegistry {
    subjects: DashMap<String, Vec<String>>,
    next_id: std::sync::atomic::AtomicU32,
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        Self {
            subjects: DashMap::new(),
            next_id: std::sync::atomic::AtomicU32::new(1),
        }
    }

    /// Register a new version unconditionally (test setup helper).
    pub fn put_schema(&self, subject: &str, schema: &str) {
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .push(schema.to_string());
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn latest_schema(&self, subject: &str) -> Result<String> {
        self.subjects
            .get(subject)
            .and_then(|versions| versions.last().cloned())
            .ok_or_else(|| SchemaError::SubjectNotFound(subject.to_string()))
    }

    async fn register_if_missing(&self, subject: &str, schema: &str) -> Result<u32> {
        let mut versions = self.subjects.entry(subject.to_string()).or_default();
        if versions.is_empty() {
            versions.push(schema.to_string());
            let id = self
                .next_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            debug!(subject, id, "Registered new schema");
            Ok(id)
        } else {
            debug!(subject, "Schema already registered, keeping existing");
            Ok(0)
        }
    }
}
