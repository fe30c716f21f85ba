//! Development proxy: the full bridge stack on an in-process broker.
//!
//! Starts the registry, router and coordinator against `InMemoryBroker`,
//! spawns a simulated remote worker answering on the echo topics, registers
//! an echo tool and an order resource, and exercises both through the local
//! surface.

use anyhow::Context;
use bridge_broker::{Broker, BrokerConsumer, InMemoryBroker, StartOffset};
use bridge_codec::{key_subject, value_subject, InMemorySchemaRegistry, SchemaRegistry};
use bridge_proxy::{
    CorrelationRouter, LocalSurface, ProxyConfig, RegistrationCoordinator, RouterSettings,
    ServiceRegistry,
};
use bridge_types::{Registration, ResourceRegistration, ToolRegistration};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proxy-dev", about = "Run the topic bridge against an in-process broker")]
struct Args {
    /// Optional TOML config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "bridge_proxy=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).context("invalid log filter")?)
        .init();

    let config = match &args.config {
        Some(path) => ProxyConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ProxyConfig::default(),
    };

    let broker = Arc::new(InMemoryBroker::new());
    let schema_registry = Arc::new(InMemorySchemaRegistry::new());
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
    info!("Bridge stack started");

    seed_topic_schemas(
        schema_registry.as_ref(),
        &["echo_req", "echo_resp", "order_req", "order_resp"],
    )
    .await?;
    spawn_echo_worker(broker.clone());
    spawn_order_worker(broker.clone());

    coordinator
        .register(ToolRegistration::new("echo", "Echoes its arguments", "echo_req", "echo_resp").into())
        .await?;
    coordinator
        .register(Registration::Resource(ResourceRegistration {
            name: "order".to_string(),
            description: "Looks up an order by id".to_string(),
            request_topic: "order_req".to_string(),
            response_topic: "order_resp".to_string(),
            correlation_id_field: "correlationId".to_string(),
            url: "orders/{id}".to_string(),
            mime_type: "application/json".to_string(),
        }))
        .await?;
    wait_for(|| coordinator.binding_count() == 2).await?;
    info!(tools = ?surface.list_tools().iter().map(|t| &t.name).collect::<Vec<_>>(), "Bindings ready");

    let echoed = surface
        .invoke_tool("echo", json!({ "text": "hello bridge" }))
        .await?;
    info!(%echoed, "Tool invocation complete");

    let order = surface.read_resource("orders/42").await?;
    info!(uri = %order.uri, body = %order.text, "Resource read complete");

    coordinator.close().await;
    router.close().await;
    registry.close().await;
    Ok(())
}

async fn seed_topic_schemas(
    registry: &dyn SchemaRegistry,
    topics: &[&str],
) -> anyhow::Result<()> {
    for topic in topics {
        registry
            .register_if_missing(&key_subject(topic), r#"{"type": "object"}"#)
            .await?;
        registry
            .register_if_missing(&value_subject(topic), r#"{"type": "object"}"#)
            .await?;
    }
    Ok(())
}

fn spawn_echo_worker(broker: Arc<InMemoryBroker>) {
    tokio::spawn(async move {
        if let Err(e) = run_echo_worker(broker).await {
            tracing::warn!(error = %e, "Echo worker failed");
        }
    });
}

async fn run_echo_worker(broker: Arc<InMemoryBroker>) -> bridge_broker::Result<()> {
    let mut consumer = broker.consumer("echo-worker", StartOffset::Earliest)?;
    consumer.subscribe(&["echo_req".to_string()]).await?;
    loop {
        for record in consumer.poll(Duration::from_millis(100)).await? {
            broker
                .publish(
                    "echo_resp",
                    record.key.clone(),
                    Some(json!({ "echoed": record.value })),
                )
                .await?;
        }
    }
}

fn spawn_order_worker(broker: Arc<InMemoryBroker>) {
    tokio::spawn(async move {
        if let Err(e) = run_order_worker(broker).await {
            tracing::warn!(error = %e, "Order worker failed");
        }
    });
}

async fn run_order_worker(broker: Arc<InMemoryBroker>) -> bridge_broker::Result<()> {
    let mut consumer = broker.consumer("order-worker", StartOffset::Earliest)?;
    consumer.subscribe(&["order_req".to_string()]).await?;
    loop {
        for record in consumer.poll(Duration::from_millis(100)).await? {
            let id = record
                .value
                .as_ref()
                .and_then(|v| v.get("id"))
                .cloned()
                .unwrap_or_default();
            broker
                .publish(
                    "order_resp",
                    record.key.clone(),
                    Some(json!({ "id": id, "status": "shipped" })),
                )
                .await?;
        }
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) -> anyhow::Result<()> {
    for _ in 0..500 {
        if cond() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("timed out waiting for bindings")
}
