//! # Registration Coordinator - Registry Changes to Surface Bindings
//!
//! ## Purpose
//! Listens to the service registry and keeps the protocol surface in step:
//! every registration becomes an exposed tool or resource, every tombstone a
//! retraction. Binding work runs on a single processing task fed by a
//! channel, so changes apply in the order the registry observed them.
//!
//! ## Lifecycle
//! An updated registration is retracted and recreated, never patched in
//! place. A binding enters the directory only after the surface exposure
//! succeeded; a failed binding is logged and the rest of the batch
//! continues.

use crate::config::ProxyConfig;
use crate::handlers::{ResourceBinding, ToolBinding};
use crate::registry::{RegistryChange, ServiceRegistry};
use crate::router::{CorrelationRouter, RouterError};
use crate::surface::{SurfaceError, ToolSurface};
use bridge_broker::{Broker, ProvisionError, TopicProvisioner};
use bridge_codec::{RegistrationSchemas, SchemaError, SchemaRegistry};
use bridge_types::{Registration, RegistrationKey, UriTemplateError};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Schema load failed: {0}")]
    Schema(#[from] SchemaError),

    #[error("Invalid resource URI template: {0}")]
    UriTemplate(#[from] UriTemplateError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),
}

/// Directory of live bindings plus the worker maintaining it.
pub struct RegistrationCoordinator {
    registry: Arc<ServiceRegistry>,
    bindings: Arc<DashMap<RegistrationKey, Registration>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RegistrationCoordinator {
    /// Install the coordinator as the registry's change listener and spawn
    /// the binding worker.
    ///
    /// Must run before `registry.start()` so replayed registrations are
    /// bound too.
    pub fn start(
        registry: Arc<ServiceRegistry>,
        router: Arc<CorrelationRouter>,
        surface: Arc<dyn ToolSurface>,
        broker: Arc<dyn Broker>,
        schema_registry: Arc<dyn SchemaRegistry>,
        config: &ProxyConfig,
    ) -> Arc<Self> {
        let bindings: Arc<DashMap<RegistrationKey, Registration>> = Arc::new(DashMap::new());
        let (tx, rx) = mpsc::unbounded_channel::<Vec<RegistryChange>>();

        registry.set_change_listener(Some(Arc::new(move |changes: &[RegistryChange]| {
            // Worker gone means shutdown; nothing left to bind.
            let _ = tx.send(changes.to_vec());
        })));

        let worker = BindingWorker {
            rx,
            router,
            surface,
            provisioner: TopicProvisioner::new(broker, schema_registry.clone()),
            schema_registry,
            bindings: bindings.clone(),
            partitions: config.provisioning.partitions,
            replication: config.provisioning.replication_factor,
        };
        let handle = tokio::spawn(worker.run());

        Arc::new(Self {
            registry,
            bindings,
            worker: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    /// Publish a registration through the registry (the binding appears when
    /// the write replays back).
    pub async fn register(&self, registration: Registration) -> crate::registry::Result<()> {
        self.registry.register(registration).await
    }

    /// Publish a retraction through the registry.
    pub async fn unregister(&self, name: &str) -> crate::registry::Result<()> {
        self.registry.unregister(name).await
    }

    /// Whether a name is currently exposed on the surface.
    pub fn is_bound(&self, name: &str) -> bool {
        self.bindings.contains_key(&RegistrationKey::new(name))
    }

    pub fn binding(&self, name: &str) -> Option<Registration> {
        self.bindings
            .get(&RegistrationKey::new(name))
            .map(|entry| entry.value().clone())
    }

    pub fn bindings(&self) -> Vec<Registration> {
        self.bindings.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Detach from the registry and wait for the worker to drain. Idempotent.
    pub async fn close(&self) {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            self.registry.set_change_listener(None);
            if let Err(e) = handle.await {
                warn!(error = %e, "Binding worker exited abnormally");
            }
        }
    }
}

struct BindingWorker {
    rx: mpsc::UnboundedReceiver<Vec<RegistryChange>>,
    router: Arc<CorrelationRouter>,
    surface: Arc<dyn ToolSurface>,
    provisioner: TopicProvisioner,
    schema_registry: Arc<dyn SchemaRegistry>,
    bindings: Arc<DashMap<RegistrationKey, Registration>>,
    partitions: u32,
    replication: u32,
}

impl BindingWorker {
    async fn run(mut self) {
        while let Some(batch) = self.rx.recv().await {
            for (key, change) in batch {
                match change {
                    None => self.retract(&key).await,
                    Some(registration) => {
                        // Updates are retract-then-recreate.
                        self.retract(&key).await;
                        if let Err(e) = self.bind(registration).await {
                            warn!(name = %key.name, error = %e, "Failed to bind registration");
                        }
                    }
                }
            }
        }
        info!("Binding worker stopped");
    }

    async fn retract(&self, key: &RegistrationKey) {
        let Some((_, old)) = self.bindings.remove(key) else {
            return;
        };
        let result = if old.is_resource() {
            self.surface.remove_resource(&key.name).await
        } else {
            self.surface.remove_tool(&key.name).await
        };
        if let Err(e) = result {
            warn!(name = %key.name, error = %e, "Surface retraction failed");
        }
    }

    async fn bind(&self, registration: Registration) -> Result<(), CoordinatorError> {
        self.provisioner
            .ensure_topic(registration.request_topic(), self.partitions, self.replication)
            .await?;
        self.provisioner
            .ensure_topic(registration.response_topic(), self.partitions, self.replication)
            .await?;

        let schemas = Arc::new(
            RegistrationSchemas::load(self.schema_registry.as_ref(), &registration).await?,
        );
        // Route the response topic now so the first invocation cannot race
        // the response consumer's subscription.
        self.router.prepare_route(&registration).await?;

        match &registration {
            Registration::Resource(resource) => {
                let binding =
                    ResourceBinding::new(resource.clone(), schemas, self.router.clone())?;
                let spec = binding.spec();
                self.surface.add_resource(spec, Arc::new(binding)).await?;
            }
            Registration::Tool(_) => {
                let binding =
                    ToolBinding::new(registration.clone(), schemas, self.router.clone());
                let spec = binding.spec();
                self.surface.add_tool(spec, Arc::new(binding)).await?;
            }
        }

        info!(name = registration.name(), "Registration bound to surface");
        self.bindings.insert(registration.key(), registration);
        Ok(())
    }
}
