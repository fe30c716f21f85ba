//! End-to-end scenarios: registration through invocation over the broker.

use bridge_broker::Broker;
use bridge_e2e_tests::{wait_until, BridgeStack};
use bridge_proxy::{ProxyConfig, SurfaceError};
use bridge_types::{Registration, ResourceRegistration, ToolRegistration};
use serde_json::json;

fn echo_tool() -> Registration {
    ToolRegistration::new("echo", "Echoes its arguments", "echo_req", "echo_resp").into()
}

#[tokio::test]
async fn echo_tool_round_trips_through_the_broker() {
    let stack = BridgeStack::start_default().await.unwrap();
    stack.seed_schemas(&["echo_req", "echo_resp"]);
    stack.spawn_worker("echo-worker", "echo_req", "echo_resp", |value| {
        json!({ "echoed": value })
    });

    stack.coordinator.register(echo_tool()).await.unwrap();
    wait_until(|| stack.coordinator.is_bound("echo")).await;

    let result = stack
        .surface
        .invoke_tool("echo", json!({ "text": "hello" }))
        .await
        .unwrap();
    assert_eq!(result["echoed"]["text"], "hello");

    // The pending table is drained once the response is routed.
    assert_eq!(stack.router.pending_len(), 0);
    stack.close().await;
}

#[tokio::test]
async fn resource_read_extracts_path_parameters() {
    let stack = BridgeStack::start_default().await.unwrap();
    stack.seed_schemas(&["order_req", "order_resp"]);
    stack.spawn_worker("order-worker", "order_req", "order_resp", |value| {
        json!({ "order": value["id"], "status": "shipped" })
    });

    stack
        .coordinator
        .register(Registration::Resource(ResourceRegistration {
            name: "order".to_string(),
            description: "Order lookup".to_string(),
            request_topic: "order_req".to_string(),
            response_topic: "order_resp".to_string(),
            correlation_id_field: "correlationId".to_string(),
            url: "orders/{id}".to_string(),
            mime_type: "application/json".to_string(),
        }))
        .await
        .unwrap();
    wait_until(|| stack.coordinator.is_bound("order")).await;

    let content = stack.surface.read_resource("orders/42").await.unwrap();
    assert_eq!(content.mime_type, "application/json");
    let body: serde_json::Value = serde_json::from_str(&content.text).unwrap();
    assert_eq!(body["order"], "42");
    assert_eq!(body["status"], "shipped");
    stack.close().await;
}

#[tokio::test]
async fn retracted_tool_is_no_longer_invocable() {
    let stack = BridgeStack::start_default().await.unwrap();
    stack.seed_schemas(&["echo_req", "echo_resp"]);
    stack.spawn_worker("echo-worker", "echo_req", "echo_resp", |value| value);

    stack.coordinator.register(echo_tool()).await.unwrap();
    wait_until(|| stack.coordinator.is_bound("echo")).await;

    stack.coordinator.unregister("echo").await.unwrap();
    wait_until(|| !stack.coordinator.is_bound("echo")).await;

    let result = stack.surface.invoke_tool("echo", json!({})).await;
    assert!(matches!(result, Err(SurfaceError::UnknownTool(_))));
    stack.close().await;
}

#[tokio::test]
async fn second_instance_rebuilds_bindings_from_compacted_topic() {
    let first = BridgeStack::start_default().await.unwrap();
    first.seed_schemas(&["echo_req", "echo_resp", "doomed_req", "doomed_resp"]);

    first.coordinator.register(echo_tool()).await.unwrap();
    first
        .coordinator
        .register(
            ToolRegistration::new("doomed", "Will be retracted", "doomed_req", "doomed_resp")
                .into(),
        )
        .await
        .unwrap();
    wait_until(|| first.coordinator.binding_count() == 2).await;
    first.coordinator.unregister("doomed").await.unwrap();
    wait_until(|| first.coordinator.binding_count() == 1).await;

    let broker = first.broker.clone();
    let schema_registry = first.schema_registry.clone();
    first.close().await;
    broker.compact(&ProxyConfig::default().registry.topic);

    let mut config = ProxyConfig::default();
    config.app_id = "second-instance".to_string();
    let second = BridgeStack::attach(broker, schema_registry, config)
        .await
        .unwrap();

    // Replay finished inside attach; bindings are already rebuilt.
    assert_eq!(second.coordinator.binding_count(), 1);
    assert!(second.coordinator.is_bound("echo"));
    assert!(!second.coordinator.is_bound("doomed"));

    second.spawn_worker("echo-worker-2", "echo_req", "echo_resp", |value| {
        json!({ "echoed": value })
    });
    let result = second
        .surface
        .invoke_tool("echo", json!({ "text": "again" }))
        .await
        .unwrap();
    assert_eq!(result["echoed"]["text"], "again");
    second.close().await;
}

#[tokio::test]
async fn dropped_response_leaves_no_pending_entry() {
    let mut config = ProxyConfig::default();
    config.router.request_timeout_ms = 300;
    let stack = BridgeStack::attach(
        std::sync::Arc::new(bridge_broker::InMemoryBroker::new()),
        std::sync::Arc::new(bridge_codec::InMemorySchemaRegistry::new()),
        config,
    )
    .await
    .unwrap();
    stack.seed_schemas(&["echo_req", "echo_resp"]);

    stack.coordinator.register(echo_tool()).await.unwrap();
    wait_until(|| stack.coordinator.is_bound("echo")).await;

    // No worker consumes echo_req; the only traffic on echo_resp carries a
    // correlation id nobody is waiting for.
    let broker = stack.broker.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            let _ = broker
                .publish(
                    "echo_resp",
                    Some(json!({ "correlationId": "bogus" })),
                    Some(json!({ "stray": true })),
                )
                .await;
        }
    });

    let result = stack.surface.invoke_tool("echo", json!({ "n": 1 })).await;
    match result {
        Err(SurfaceError::Invocation(reason)) => {
            assert!(reason.contains("No response within"), "unexpected: {reason}")
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert_eq!(stack.router.pending_len(), 0);
    stack.close().await;
}
