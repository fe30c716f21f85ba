//! Protocol surface seam.
//!
//! The coordinator exposes bindings through this trait; the bridge core
//! never depends on a concrete protocol server. `LocalSurface` is the
//! in-process implementation used by the dev binary and the tests, and it
//! doubles as a direct invocation API.

use async_trait::async_trait;
use bridge_types::UriTemplate;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SurfaceError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("No resource matches URI: {0}")]
    UnknownResource(String),

    #[error("Invalid resource URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The bound handler failed to produce a result
    #[error("Invocation failed: {0}")]
    Invocation(String),
}

pub type Result<T> = std::result::Result<T, SurfaceError>;

/// Metadata shown to protocol clients for a callable tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's arguments.
    pub input_schema: Value,
}

/// Metadata shown to protocol clients for a readable resource.
#[derive(Debug, Clone)]
pub struct ResourceSpec {
    pub name: String,
    pub description: String,
    pub uri_template: String,
    pub mime_type: String,
}

/// Content returned from a resource read.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceContent {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

/// Callback bound to a tool exposure.
#[async_trait]
pub trait ToolCallback: Send + Sync {
    async fn invoke(&self, arguments: Value) -> Result<Value>;
}

/// Callback bound to a resource exposure.
#[async_trait]
pub trait ResourceCallback: Send + Sync {
    async fn read(&self, uri: &str) -> Result<ResourceContent>;
}

/// Tool-calling protocol surface. Add/remove are idempotent: re-adding a
/// name replaces the exposure, removing an absent name is a no-op.
#[async_trait]
pub trait ToolSurface: Send + Sync {
    async fn add_tool(&self, spec: ToolSpec, callback: Arc<dyn ToolCallback>) -> Result<()>;

    async fn remove_tool(&self, name: &str) -> Result<()>;

    async fn add_resource(
        &self,
        spec: ResourceSpec,
        callback: Arc<dyn ResourceCallback>,
    ) -> Result<()>;

    async fn remove_resource(&self, name: &str) -> Result<()>;
}

/// In-process surface with direct invocation entry points.
#[derive(Default)]
pub struct LocalSurface {
    tools: DashMap<String, (ToolSpec, Arc<dyn ToolCallback>)>,
    resources: DashMap<String, (ResourceSpec, Arc<dyn ResourceCallback>)>,
}

impl LocalSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke an exposed tool by name.
    pub async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let callback = self
            .tools
            .get(name)
            .map(|entry| entry.value().1.clone())
            .ok_or_else(|| SurfaceError::UnknownTool(name.to_string()))?;
        callback.invoke(arguments).await
    }

    /// Read a resource by concrete URI; the resource whose template matches
    /// the URI serves the read.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContent> {
        let callback = self
            .resources
            .iter()
            .find(|entry| {
                UriTemplate::parse(&entry.value().0.uri_template)
                    .map(|template| template.matches(uri))
                    .unwrap_or(false)
            })
            .map(|entry| entry.value().1.clone())
            .ok_or_else(|| SurfaceError::UnknownResource(uri.to_string()))?;
        callback.read(uri).await
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|entry| entry.value().0.clone()).collect()
    }

    pub fn list_resources(&self) -> Vec<ResourceSpec> {
        self.resources
            .iter()
            .map(|entry| entry.value().0.clone())
            .collect()
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

#[async_trait]
impl ToolSurface for LocalSurface {
    async fn add_tool(&self, spec: ToolSpec, callback: Arc<dyn ToolCallback>) -> Result<()> {
        info!(name = %spec.name, "Tool exposed");
        self.tools.insert(spec.name.clone(), (spec, callback));
        Ok(())
    }

    async fn remove_tool(&self, name: &str) -> Result<()> {
        if self.tools.remove(name).is_some() {
            info!(name, "Tool retracted");
        } else {
            debug!(name, "Tool retraction for unknown name, ignoring");
        }
        Ok(())
    }

    async fn add_resource(
        &self,
        spec: ResourceSpec,
        callback: Arc<dyn ResourceCallback>,
    ) -> Result<()> {
        info!(name = %spec.name, template = %spec.uri_template, "Resource exposed");
        self.resources.insert(spec.name.clone(), (spec, callback));
        Ok(())
    }

    async fn remove_resource(&self, name: &str) -> Result<()> {
        if self.resources.remove(name).is_some() {
            info!(name, "Resource retracted");
        } else {
            debug!(name, "Resource retraction for unknown name, ignoring");
        }
        Ok(())
    }
}
