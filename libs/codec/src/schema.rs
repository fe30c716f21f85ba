//! Compiled topic schemas and per-registration schema bundles.

use crate::error::{Result, SchemaError};
use crate::registry::{key_subject, value_subject, SchemaRegistry};
use bridge_types::Registration;
use jsonschema::JSONSchema;
use serde_json::Value;
use std::fmt;

/// JSON schema text for the registry topic's record key.
pub fn registration_key_schema() -> String {
    serde_json::json!({
        "title": "RegistrationKey",
        "type": "object",
        "properties": { "name": { "type": "string" } },
        "required": ["name"]
    })
    .to_string()
}

/// JSON schema text for the registry topic's record value.
pub fn registration_value_schema() -> String {
    serde_json::json!({
        "title": "Registration",
        "type": "object",
        "properties": {
            "name": { "type": "string" },
            "description": { "type": "string" },
            "requestTopicName": { "type": "string" },
            "responseTopicName": { "type": "string" },
            "correlationIdFieldName": { "type": ["string", "null"] },
            "url": { "type": "string" },
            "mimeType": { "type": "string" }
        },
        "required": ["name", "description", "requestTopicName", "responseTopicName"]
    })
    .to_string()
}

/// A topic's schema, parsed and compiled once at registration time.
pub struct TopicSchema {
    subject: String,
    raw: String,
    parsed: Value,
    compiled: JSONSchema,
}

impl TopicSchema {
    pub fn compile(subject: &str, raw: &str) -> Result<Self> {
        let parsed: Value =
            serde_json::from_str(raw).map_err(|e| SchemaError::InvalidSchema {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        let compiled = JSONSchema::compile(&parsed).map_err(|e| SchemaError::InvalidSchema {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            subject: subject.to_string(),
            raw: raw.to_string(),
            parsed,
            compiled,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Raw schema text as stored in the registry.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Parsed schema document, suitable as a protocol surface input schema.
    pub fn document(&self) -> &Value {
        &self.parsed
    }

    /// Validate a payload against this schema and return the wire value.
    ///
    /// The wire framing itself (schema id prefixes etc.) belongs to the
    /// registry collaborator; the core only guarantees the payload conforms.
    pub fn envelope(&self, value: Value) -> Result<Value> {
        if let Err(errors) = self.compiled.validate(&value) {
            let reasons: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(SchemaError::ValidationFailed(format!(
                "{}: {}",
                self.subject,
                reasons.join("; ")
            )));
        }
        Ok(value)
    }
}

impl fmt::Debug for TopicSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicSchema")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// The four subjects backing one registration, fetched when the handler
/// binding is created.
///
/// The request pair is compiled because the router envelopes outbound
/// records. The response pair is kept as text for surface metadata only;
/// inbound records were already validated by the producing side.
#[derive(Debug)]
pub struct RegistrationSchemas {
    request_key: TopicSchema,
    request_value: TopicSchema,
    response_key: String,
    response_value: String,
}

impl RegistrationSchemas {
    pub async fn load(
        registry: &dyn SchemaRegistry,
        registration: &Registration,
    ) -> Result<Self> {
        let request_topic = registration.request_topic();
        let response_topic = registration.response_topic();

        let request_key_subject = key_subject(request_topic);
        let request_value_subject = value_subject(request_topic);

        let request_key = registry.latest_schema(&request_key_subject).await?;
        let request_value = registry.latest_schema(&request_value_subject).await?;
        let response_key = registry.latest_schema(&key_subject(response_topic)).await?;
        let response_value = registry
            .latest_schema(&value_subject(response_topic))
            .await?;

        Ok(Self {
            request_key: TopicSchema::compile(&request_key_subject, &request_key)?,
            request_value: TopicSchema::compile(&request_value_subject, &request_value)?,
            response_key,
            response_value,
        })
    }

    pub fn request_key(&self) -> &TopicSchema {
        &self.request_key
    }

    pub fn request_value(&self) -> &TopicSchema {
        &self.request_value
    }

    pub fn response_key_raw(&self) -> &str {
        &self.response_key
    }

    pub fn response_value_raw(&self) -> &str {
        &self.response_value
    }
}
