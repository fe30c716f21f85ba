//! Shared harness for the end-to-end scenarios.
//!
//! `BridgeStack` wires the full proxy (registry, router, coordinator,
//! surface) onto an in-process broker and schema registry. Scenarios share
//! a broker between stacks to exercise replay and multi-instance behavior.

use bridge_broker::{Broker, BrokerConsumer, InMemoryBroker, StartOffset};
use bridge_codec::{key_subject, value_subject, InMemorySchemaRegistry};
use bridge_proxy::{
    CorrelationRouter, LocalSurface, ProxyConfig, RegistrationCoordinator, RouterSettings,
    ServiceRegistry,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A complete proxy instance plus its collaborators.
pub struct BridgeStack {
    pub broker: Arc<InMemoryBroker>,
    pub schema_registry: Arc<InMemorySchemaRegistry>,
    pub surface: Arc<LocalSurface>,
    pub registry: Arc<ServiceRegistry>,
    pub router: Arc<CorrelationRouter>,
    pub coordinator: Arc<RegistrationCoordinator>,
}

impl BridgeStack {
    /// Fresh broker, fresh schema registry, default config.
    pub async fn start_default() -> anyhow::Result<Self> {
        Self::attach(
            Arc::new(InMemoryBroker::new()),
            Arc::new(InMemorySchemaRegistry::new()),
            ProxyConfig::default(),
        )
        .await
    }

    /// Start a proxy instance against existing collaborators; used to
    /// simulate a second instance or a restart.
    pub async fn attach(
        broker: Arc<InMemoryBroker>,
        schema_registry: Arc<InMemorySchemaRegistry>,
        config: ProxyConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let surface = Arc::new(LocalSurface::new());

        let registry = Arc::new(ServiceRegistry::new(
            broker.clone() as Arc<dyn Broker>,
            schema_registry.clone(),
            &config,
        )?);
        let router = CorrelationRouter::start(
            broker.clone() as Arc<dyn Broker>,
            RouterSettings::from_config(&config),
        )?;
        let coordinator = RegistrationCoordinator::start(
            registry.clone(),
            router.clone(),
            surface.clone(),
            broker.clone() as Arc<dyn Broker>,
            schema_registry.clone(),
            &config,
        );
        registry.start().await?;

        Ok(Self {
            broker,
            schema_registry,
            surface,
            registry,
            router,
            coordinator,
        })
    }

    /// Seed permissive key/value schemas for a set of topics.
    pub fn seed_schemas(&self, topics: &[&str]) {
        for topic in topics {
            self.schema_registry
                .put_schema(&key_subject(topic), r#"{"type": "object"}"#);
            self.schema_registry
                .put_schema(&value_subject(topic), r#"{"type": "object"}"#);
        }
    }

    /// Simulated remote worker: consumes the request topic and answers on
    /// the response topic, copying the record key so correlation ids
    /// round-trip.
    pub fn spawn_worker(
        &self,
        group: &str,
        request_topic: &str,
        response_topic: &str,
        reply: fn(Value) -> Value,
    ) {
        let broker = self.broker.clone();
        let group = group.to_string();
        let request_topic = request_topic.to_string();
        let response_topic = response_topic.to_string();
        tokio::spawn(async move {
            if let Err(e) =
                run_worker(broker, &group, &request_topic, &response_topic, reply).await
            {
                tracing::warn!(error = %e, "Simulated worker failed");
            }
        });
    }

    pub async fn close(&self) {
        self.coordinator.close().await;
        self.router.close().await;
        self.registry.close().await;
    }
}

async fn run_worker(
    broker: Arc<InMemoryBroker>,
    group: &str,
    request_topic: &str,
    response_topic: &str,
    reply: fn(Value) -> Value,
) -> bridge_broker::Result<()> {
    let mut consumer = broker.consumer(group, StartOffset::Earliest)?;
    consumer.subscribe(&[request_topic.to_string()]).await?;
    loop {
        for record in consumer.poll(Duration::from_millis(100)).await? {
            let response = reply(record.value.clone().unwrap_or(Value::Null));
            broker
                .publish(response_topic, record.key.clone(), Some(response))
                .await?;
        }
    }
}

/// Poll a condition for up to five seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}
