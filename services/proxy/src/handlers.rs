//! Handler bindings created by the coordinator.
//!
//! A binding ties one registration to the correlation router with the
//! schemas fetched at binding time. Every invocation mints a fresh UUID v4
//! correlation id; the codec was already chosen when the binding was built,
//! so invocation is just envelope, publish, await.

use crate::router::CorrelationRouter;
use crate::surface::{
    ResourceCallback, ResourceContent, ResourceSpec, SurfaceError, ToolCallback, ToolSpec,
};
use async_trait::async_trait;
use bridge_codec::RegistrationSchemas;
use bridge_types::{Registration, ResourceRegistration, UriTemplate, UriTemplateError};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Tool exposure backed by a request/response topic pair.
pub struct ToolBinding {
    registration: Registration,
    schemas: Arc<RegistrationSchemas>,
    router: Arc<CorrelationRouter>,
}

impl ToolBinding {
    pub fn new(
        registration: Registration,
        schemas: Arc<RegistrationSchemas>,
        router: Arc<CorrelationRouter>,
    ) -> Self {
        Self {
            registration,
            schemas,
            router,
        }
    }

    /// Surface metadata: the request value schema doubles as the tool's
    /// input schema.
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.registration.name().to_string(),
            description: self.registration.description().to_string(),
            input_schema: self.schemas.request_value().document().clone(),
        }
    }
}

#[async_trait]
impl ToolCallback for ToolBinding {
    async fn invoke(&self, arguments: Value) -> Result<Value, SurfaceError> {
        let correlation_id = Uuid::new_v4().to_string();
        debug!(
            tool = self.registration.name(),
            correlation_id, "Tool invocation"
        );
        self.router
            .send_and_await(&self.registration, &self.schemas, &correlation_id, arguments)
            .await
            .map_err(|e| SurfaceError::Invocation(e.to_string()))
    }
}

/// Resource exposure: URI path parameters become the request payload.
pub struct ResourceBinding {
    registration: Registration,
    mime_type: String,
    template: UriTemplate,
    schemas: Arc<RegistrationSchemas>,
    router: Arc<CorrelationRouter>,
}

impl ResourceBinding {
    pub fn new(
        resource: ResourceRegistration,
        schemas: Arc<RegistrationSchemas>,
        router: Arc<CorrelationRouter>,
    ) -> Result<Self, UriTemplateError> {
        let template = UriTemplate::parse(&resource.url)?;
        Ok(Self {
            mime_type: resource.mime_type.clone(),
            template,
            registration: Registration::Resource(resource),
            schemas,
            router,
        })
    }

    pub fn spec(&self) -> ResourceSpec {
        ResourceSpec {
            name: self.registration.name().to_string(),
            description: self.registration.description().to_string(),
            uri_template: self.template.template().to_string(),
            mime_type: self.mime_type.clone(),
        }
    }
}

#[async_trait]
impl ResourceCallback for ResourceBinding {
    async fn read(&self, uri: &str) -> Result<ResourceContent, SurfaceError> {
        let params = self.template.extract(uri).map_err(|e| SurfaceError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        let correlation_id = Uuid::new_v4().to_string();
        debug!(
            resource = self.registration.name(),
            uri, correlation_id, "Resource read"
        );
        let response = self
            .router
            .send_and_await(
                &self.registration,
                &self.schemas,
                &correlation_id,
                Value::Object(params),
            )
            .await
            .map_err(|e| SurfaceError::Invocation(e.to_string()))?;

        let text = match response {
            Value::String(text) => text,
            other => other.to_string(),
        };
        Ok(ResourceContent {
            uri: uri.to_string(),
            mime_type: self.mime_type.clone(),
            text,
        })
    }
}
