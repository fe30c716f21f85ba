//! Registration descriptors stored in the compacted registry topic.
//!
//! The wire format keeps the original field names (`requestTopicName`,
//! `responseTopicName`, `correlationIdFieldName`) so registrations written by
//! agents in other languages replay cleanly into the mirror.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Default key field carrying the correlation id in request/response records.
pub const DEFAULT_CORRELATION_ID_FIELD: &str = "correlationId";

fn default_correlation_id_field() -> String {
    DEFAULT_CORRELATION_ID_FIELD.to_string()
}

/// Primary identity of a registration in the registry topic.
///
/// Ordering and equality are by name only; the name is case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationKey {
    pub name: String,
}

impl RegistrationKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl PartialOrd for RegistrationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RegistrationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

/// Descriptor of a callable tool backed by a request/response topic pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRegistration {
    pub name: String,
    pub description: String,
    #[serde(rename = "requestTopicName")]
    pub request_topic: String,
    #[serde(rename = "responseTopicName")]
    pub response_topic: String,
    #[serde(
        rename = "correlationIdFieldName",
        default = "default_correlation_id_field"
    )]
    pub correlation_id_field: String,
}

impl ToolRegistration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        request_topic: impl Into<String>,
        response_topic: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            request_topic: request_topic.into(),
            response_topic: response_topic.into(),
            correlation_id_field: default_correlation_id_field(),
        }
    }
}

/// Descriptor of a readable resource: a tool plus a URI template and MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRegistration {
    pub name: String,
    pub description: String,
    #[serde(rename = "requestTopicName")]
    pub request_topic: String,
    #[serde(rename = "responseTopicName")]
    pub response_topic: String,
    #[serde(
        rename = "correlationIdFieldName",
        default = "default_correlation_id_field"
    )]
    pub correlation_id_field: String,
    /// URI template exposed to the protocol surface, e.g. `orders/{id}`.
    pub url: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// A registered tool or resource.
///
/// Untagged on the wire: a resource is recognised by its extra required
/// fields (`url`, `mimeType`), so the resource variant must be tried first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Registration {
    Resource(ResourceRegistration),
    Tool(ToolRegistration),
}

impl Registration {
    pub fn name(&self) -> &str {
        match self {
            Registration::Resource(r) => &r.name,
            Registration::Tool(t) => &t.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Registration::Resource(r) => &r.description,
            Registration::Tool(t) => &t.description,
        }
    }

    pub fn request_topic(&self) -> &str {
        match self {
            Registration::Resource(r) => &r.request_topic,
            Registration::Tool(t) => &t.request_topic,
        }
    }

    pub fn response_topic(&self) -> &str {
        match self {
            Registration::Resource(r) => &r.response_topic,
            Registration::Tool(t) => &t.response_topic,
        }
    }

    pub fn correlation_id_field(&self) -> &str {
        match self {
            Registration::Resource(r) => &r.correlation_id_field,
            Registration::Tool(t) => &t.correlation_id_field,
        }
    }

    pub fn key(&self) -> RegistrationKey {
        RegistrationKey::new(self.name())
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Registration::Resource(_))
    }
}

impl From<ToolRegistration> for Registration {
    fn from(value: ToolRegistration) -> Self {
        Registration::Tool(value)
    }
}

impl From<ResourceRegistration> for Registration {
    fn from(value: ResourceRegistration) -> Self {
        Registration::Resource(value)
    }
}
