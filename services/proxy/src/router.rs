//! # Correlation Router - Request/Response Bridge
//!
//! ## Purpose
//! Publishes a keyed request record and completes the caller's future when
//! the matching response record arrives. The match key is the pair
//! `(response topic, correlation id)`; the correlation id travels in the
//! record key under the field the registration declares.
//!
//! ## Architecture Role
//!
//! ```text
//! caller ─► send_and_await ─► envelope ─► Publisher ─► request topic
//!    ▲                            │
//!    │                       pending table
//!    │                            │
//! oneshot ◄── dispatch ◄── SubscriptionEngine ◄── response topic
//! ```
//!
//! ## Guarantees
//! - At-most-once completion: the pending entry is removed before the
//!   oneshot fires, so a second response with the same correlation id is
//!   dropped with a warning.
//! - No orphaned waits: every await is bounded by the configured timeout,
//!   and a periodic sweep clears entries whose callers vanished.

use crate::config::ProxyConfig;
use bridge_broker::{
    Broker, BrokerError, EngineConfig, Publisher, Record, StartOffset, SubscriptionEngine,
};
use bridge_codec::{RegistrationSchemas, SchemaError};
use bridge_types::Registration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum RouterError {
    /// A request with this correlation id is already pending on the topic
    #[error("Correlation id {correlation_id} already pending on topic {topic}")]
    DuplicateCorrelation {
        topic: String,
        correlation_id: String,
    },

    /// A newer request with the same correlation id replaced this one
    #[error("Request superseded by a newer request with the same correlation id")]
    Superseded,

    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// The pending entry vanished without a response
    #[error("Request was cancelled before a response arrived")]
    Cancelled,

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub type Result<T> = std::result::Result<T, RouterError>;

/// What happens when a caller reuses a correlation id that is still pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// The original request keeps its entry; the new caller gets an error.
    #[default]
    KeepOriginal,
    /// The new request takes the entry; the original resolves as superseded.
    ReplaceOriginal,
}

/// Router tuning, derived from [`ProxyConfig`].
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub group_id: String,
    pub timeout: Duration,
    pub sweep_interval: Duration,
    pub duplicate_policy: DuplicatePolicy,
}

impl RouterSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            group_id: config.responses_group(),
            timeout: config.request_timeout(),
            sweep_interval: config.sweep_interval(),
            duplicate_policy: config.router.duplicate_policy,
        }
    }
}

type PendingKey = (String, String);

struct Pending {
    tx: oneshot::Sender<Result<Value>>,
    deadline: Instant,
}

/// Pending-request table plus the response poll worker feeding it.
pub struct CorrelationRouter {
    engine: SubscriptionEngine,
    publisher: Publisher,
    pending: Arc<DashMap<PendingKey, Pending>>,
    // Response topics already wired into the engine, with their key field.
    routes: DashMap<String, String>,
    settings: RouterSettings,
    sweeper: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CorrelationRouter {
    /// Spawn the response consumer (latest offsets, responses to requests
    /// sent before this router existed are not ours) and the expiry sweep.
    pub fn start(broker: Arc<dyn Broker>, settings: RouterSettings) -> Result<Arc<Self>> {
        let engine = SubscriptionEngine::start(
            broker.clone(),
            EngineConfig::new(settings.group_id.as_str(), StartOffset::Latest),
        )?;

        let pending: Arc<DashMap<PendingKey, Pending>> = Arc::new(DashMap::new());
        let sweeper = tokio::spawn(Self::sweep_loop(
            pending.clone(),
            settings.sweep_interval,
            settings.timeout,
        ));

        Ok(Arc::new(Self {
            engine,
            publisher: Publisher::new(broker),
            pending,
            routes: DashMap::new(),
            settings,
            sweeper: parking_lot::Mutex::new(Some(sweeper)),
        }))
    }

    /// Publish an enveloped request and await its response.
    ///
    /// The correlation id is placed in the record key under the field the
    /// registration declares; the response consumer completes the returned
    /// future when a record with that key arrives on the response topic.
    pub async fn send_and_await(
        &self,
        registration: &Registration,
        schemas: &RegistrationSchemas,
        correlation_id: &str,
        payload: Value,
    ) -> Result<Value> {
        let request_topic = registration.request_topic();
        let response_topic = registration.response_topic();
        let field = registration.correlation_id_field();

        let key = schemas
            .request_key()
            .envelope(json!({ field: correlation_id }))?;
        let value = schemas.request_value().envelope(payload)?;

        self.ensure_route(response_topic, field).await?;

        let (tx, rx) = oneshot::channel();
        let pending_key = (response_topic.to_string(), correlation_id.to_string());
        let entry = Pending {
            tx,
            deadline: Instant::now() + self.settings.timeout,
        };

        match self.pending.entry(pending_key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
            }
            Entry::Occupied(mut occupied) => match self.settings.duplicate_policy {
                DuplicatePolicy::KeepOriginal => {
                    warn!(
                        topic = response_topic,
                        correlation_id, "Duplicate correlation id, keeping original request"
                    );
                    return Err(RouterError::DuplicateCorrelation {
                        topic: response_topic.to_string(),
                        correlation_id: correlation_id.to_string(),
                    });
                }
                DuplicatePolicy::ReplaceOriginal => {
                    warn!(
                        topic = response_topic,
                        correlation_id, "Duplicate correlation id, superseding original request"
                    );
                    let old = occupied.insert(entry);
                    let _ = old.tx.send(Err(RouterError::Superseded));
                }
            },
        }

        if let Err(e) = self
            .publisher
            .send(request_topic, Some(key), Some(value))
            .await
        {
            self.pending.remove(&pending_key);
            return Err(e.into());
        }
        debug!(
            topic = request_topic,
            correlation_id, "Request published, awaiting response"
        );

        match tokio::time::timeout(self.settings.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RouterError::Cancelled),
            Err(_) => {
                self.pending.remove(&pending_key);
                Err(RouterError::Timeout(self.settings.timeout))
            }
        }
    }

    /// Requests currently awaiting a response.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Stop the sweep and the response consumer. Idempotent.
    pub async fn close(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        self.engine.stop().await;
        info!("Correlation router closed");
    }

    /// Route a registration's response topic ahead of its first request,
    /// typically when the handler binding is created.
    pub async fn prepare_route(&self, registration: &Registration) -> Result<()> {
        self.ensure_route(
            registration.response_topic(),
            registration.correlation_id_field(),
        )
        .await
    }

    /// Subscribe the response consumer to a topic once; later requests for
    /// the same topic reuse the route. Returns only after the poll worker
    /// owns the subscription, otherwise a fast response could land before
    /// the consumer's start position.
    async fn ensure_route(&self, topic: &str, field: &str) -> Result<()> {
        match self.routes.entry(topic.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get() != field {
                    warn!(
                        topic,
                        bound = %existing.get(),
                        requested = field,
                        "Response topic already routed with a different key field"
                    );
                }
            }
            Entry::Vacant(vacant) => {
                let pending = self.pending.clone();
                let topic_name = topic.to_string();
                let field_name = field.to_string();
                self.engine.subscribe(
                    topic,
                    Arc::new(move |records: &[Record]| {
                        Self::dispatch(&pending, &topic_name, &field_name, records);
                        Ok(())
                    }),
                )?;
                vacant.insert(field.to_string());
                info!(topic, field, "Response topic routed");
            }
        }

        for _ in 0..500 {
            if self.engine.subscribed_topics().contains(topic) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Err(RouterError::Broker(BrokerError::Consumer(format!(
            "response subscription for {topic} was not applied"
        ))))
    }

    fn dispatch(
        pending: &DashMap<PendingKey, Pending>,
        topic: &str,
        field: &str,
        records: &[Record],
    ) {
        for record in records {
            let correlation_id = record
                .key
                .as_ref()
                .and_then(|key| key.get(field))
                .and_then(Value::as_str);
            let Some(correlation_id) = correlation_id else {
                warn!(topic, offset = record.offset, "No correlation id in record key");
                continue;
            };

            match pending.remove(&(topic.to_string(), correlation_id.to_string())) {
                Some((_, entry)) => {
                    let value = record.value.clone().unwrap_or(Value::Null);
                    if entry.tx.send(Ok(value)).is_err() {
                        debug!(topic, correlation_id, "Caller gone before response arrived");
                    }
                }
                None => {
                    warn!(topic, correlation_id, "No pending request for correlation id");
                }
            }
        }
    }

    async fn sweep_loop(
        pending: Arc<DashMap<PendingKey, Pending>>,
        interval: Duration,
        timeout: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let expired: Vec<PendingKey> = pending
                .iter()
                .filter(|entry| entry.value().deadline <= now)
                .map(|entry| entry.key().clone())
                .collect();
            for key in expired {
                if let Some((key, entry)) = pending.remove_if(&key, |_, v| v.deadline <= now) {
                    warn!(topic = %key.0, correlation_id = %key.1, "Swept expired pending request");
                    let _ = entry.tx.send(Err(RouterError::Timeout(timeout)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_broker::{BrokerConsumer, InMemoryBroker};
    use bridge_codec::{key_subject, value_subject, InMemorySchemaRegistry, SchemaRegistry};
    use bridge_types::ToolRegistration;

    fn echo_registration() -> Registration {
        ToolRegistration::new("echo", "Echoes text", "echo_req", "echo_resp").into()
    }

    async fn echo_schemas(registry: &InMemorySchemaRegistry) -> RegistrationSchemas {
        for topic in ["echo_req", "echo_resp"] {
            registry.put_schema(&key_subject(topic), r#"{"type": "object"}"#);
            registry.put_schema(&value_subject(topic), r#"{"type": "object"}"#);
        }
        RegistrationSchemas::load(registry, &echo_registration())
            .await
            .unwrap()
    }

    fn settings(policy: DuplicatePolicy, timeout: Duration) -> RouterSettings {
        RouterSettings {
            group_id: "test-responses".to_string(),
            timeout,
            sweep_interval: timeout / 2,
            duplicate_policy: policy,
        }
    }

    /// Consume one request from `echo_req` and answer it on `echo_resp`,
    /// copying the record key so the correlation id round-trips.
    fn spawn_echo_worker(broker: Arc<InMemoryBroker>) {
        tokio::spawn(async move {
            let mut consumer = broker
                .consumer("worker", StartOffset::Earliest)
                .unwrap();
            consumer.subscribe(&["echo_req".to_string()]).await.unwrap();
            loop {
                let records = consumer.poll(Duration::from_millis(100)).await.unwrap();
                for record in records {
                    broker
                        .publish(
                            "echo_resp",
                            record.key.clone(),
                            Some(json!({ "echoed": record.value })),
                        )
                        .await
                        .unwrap();
                }
            }
        });
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn request_completes_when_response_arrives() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = InMemorySchemaRegistry::new();
        let schemas = echo_schemas(&registry).await;
        let router = CorrelationRouter::start(
            broker.clone(),
            settings(DuplicatePolicy::KeepOriginal, Duration::from_secs(5)),
        )
        .unwrap();
        spawn_echo_worker(broker);

        let response = router
            .send_and_await(
                &echo_registration(),
                &schemas,
                "cid-1",
                json!({ "text": "hi" }),
            )
            .await
            .unwrap();

        assert_eq!(response["echoed"]["text"], "hi");
        assert_eq!(router.pending_len(), 0);
        router.close().await;
    }

    #[tokio::test]
    async fn keep_original_rejects_duplicate_and_original_completes() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = InMemorySchemaRegistry::new();
        let schemas = Arc::new(echo_schemas(&registry).await);
        let router = CorrelationRouter::start(
            broker.clone(),
            settings(DuplicatePolicy::KeepOriginal, Duration::from_secs(5)),
        )
        .unwrap();

        let first_router = router.clone();
        let first_schemas = schemas.clone();
        let first = tokio::spawn(async move {
            first_router
                .send_and_await(
                    &echo_registration(),
                    &first_schemas,
                    "dup",
                    json!({ "n": 1 }),
                )
                .await
        });
        wait_until(|| router.pending_len() == 1).await;

        let second = router
            .send_and_await(&echo_registration(), &schemas, "dup", json!({ "n": 2 }))
            .await;
        assert!(matches!(
            second,
            Err(RouterError::DuplicateCorrelation { .. })
        ));

        broker
            .publish(
                "echo_resp",
                Some(json!({ "correlationId": "dup" })),
                Some(json!({ "winner": 1 })),
            )
            .await
            .unwrap();

        let response = first.await.unwrap().unwrap();
        assert_eq!(response["winner"], 1);
        router.close().await;
    }

    #[tokio::test]
    async fn replace_original_supersedes_first_caller() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = InMemorySchemaRegistry::new();
        let schemas = Arc::new(echo_schemas(&registry).await);
        let router = CorrelationRouter::start(
            broker.clone(),
            settings(DuplicatePolicy::ReplaceOriginal, Duration::from_secs(5)),
        )
        .unwrap();

        let first_router = router.clone();
        let first_schemas = schemas.clone();
        let first = tokio::spawn(async move {
            first_router
                .send_and_await(
                    &echo_registration(),
                    &first_schemas,
                    "dup",
                    json!({ "n": 1 }),
                )
                .await
        });
        wait_until(|| router.pending_len() == 1).await;

        let second_router = router.clone();
        let second_schemas = schemas.clone();
        let second = tokio::spawn(async move {
            second_router
                .send_and_await(
                    &echo_registration(),
                    &second_schemas,
                    "dup",
                    json!({ "n": 2 }),
                )
                .await
        });

        assert!(matches!(
            first.await.unwrap(),
            Err(RouterError::Superseded)
        ));

        broker
            .publish(
                "echo_resp",
                Some(json!({ "correlationId": "dup" })),
                Some(json!({ "winner": 2 })),
            )
            .await
            .unwrap();
        let response = second.await.unwrap().unwrap();
        assert_eq!(response["winner"], 2);
        router.close().await;
    }

    #[tokio::test]
    async fn request_times_out_and_clears_pending() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = InMemorySchemaRegistry::new();
        let schemas = echo_schemas(&registry).await;
        let router = CorrelationRouter::start(
            broker,
            settings(DuplicatePolicy::KeepOriginal, Duration::from_millis(100)),
        )
        .unwrap();

        let result = router
            .send_and_await(&echo_registration(), &schemas, "cid", json!({}))
            .await;
        assert!(matches!(result, Err(RouterError::Timeout(_))));
        assert_eq!(router.pending_len(), 0);
        router.close().await;
    }

    #[tokio::test]
    async fn stray_responses_are_dropped_without_disturbing_pending() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = InMemorySchemaRegistry::new();
        let schemas = Arc::new(echo_schemas(&registry).await);
        let router = CorrelationRouter::start(
            broker.clone(),
            settings(DuplicatePolicy::KeepOriginal, Duration::from_secs(5)),
        )
        .unwrap();

        let task_router = router.clone();
        let task_schemas = schemas.clone();
        let pending = tokio::spawn(async move {
            task_router
                .send_and_await(&echo_registration(), &task_schemas, "real", json!({}))
                .await
        });
        wait_until(|| router.pending_len() == 1).await;

        // Keyless record, then an unknown correlation id.
        broker
            .publish("echo_resp", None, Some(json!({ "noise": true })))
            .await
            .unwrap();
        broker
            .publish(
                "echo_resp",
                Some(json!({ "correlationId": "unknown" })),
                Some(json!({ "noise": true })),
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(router.pending_len(), 1);

        broker
            .publish(
                "echo_resp",
                Some(json!({ "correlationId": "real" })),
                Some(json!({ "ok": true })),
            )
            .await
            .unwrap();
        let response = pending.await.unwrap().unwrap();
        assert_eq!(response["ok"], true);
        router.close().await;
    }

    #[tokio::test]
    async fn second_response_with_same_correlation_id_is_dropped() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = InMemorySchemaRegistry::new();
        let schemas = Arc::new(echo_schemas(&registry).await);
        let router = CorrelationRouter::start(
            broker.clone(),
            settings(DuplicatePolicy::KeepOriginal, Duration::from_secs(5)),
        )
        .unwrap();

        let task_router = router.clone();
        let task_schemas = schemas.clone();
        let caller = tokio::spawn(async move {
            task_router
                .send_and_await(&echo_registration(), &task_schemas, "cid", json!({}))
                .await
        });
        wait_until(|| router.pending_len() == 1).await;

        broker
            .publish(
                "echo_resp",
                Some(json!({ "correlationId": "cid" })),
                Some(json!({ "arrival": "first" })),
            )
            .await
            .unwrap();
        broker
            .publish(
                "echo_resp",
                Some(json!({ "correlationId": "cid" })),
                Some(json!({ "arrival": "second" })),
            )
            .await
            .unwrap();

        // Only the first response completes the caller; the repeat finds no
        // pending entry and is logged and discarded.
        let response = caller.await.unwrap().unwrap();
        assert_eq!(response["arrival"], "first");
        wait_until(|| router.pending_len() == 0).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(router.pending_len(), 0);
        router.close().await;
    }

    #[tokio::test]
    async fn payload_failing_schema_validation_is_rejected_before_publish() {
        let broker = Arc::new(InMemoryBroker::new());
        let registry = InMemorySchemaRegistry::new();
        registry.put_schema(&key_subject("echo_req"), r#"{"type": "object"}"#);
        registry.put_schema(
            &value_subject("echo_req"),
            r#"{"type": "object", "required": ["text"]}"#,
        );
        registry.put_schema(&key_subject("echo_resp"), r#"{"type": "object"}"#);
        registry.put_schema(&value_subject("echo_resp"), r#"{"type": "object"}"#);
        let schemas = RegistrationSchemas::load(&registry, &echo_registration())
            .await
            .unwrap();

        let router = CorrelationRouter::start(
            broker.clone(),
            settings(DuplicatePolicy::KeepOriginal, Duration::from_secs(5)),
        )
        .unwrap();

        let result = router
            .send_and_await(&echo_registration(), &schemas, "cid", json!({ "other": 1 }))
            .await;
        assert!(matches!(result, Err(RouterError::Schema(_))));
        assert_eq!(router.pending_len(), 0);
        assert_eq!(broker.end_offset("echo_req").await.unwrap(), 0);
        router.close().await;
    }
}
