//! URI template matching for resource registrations.
//!
//! A resource registration exposes a template such as `orders/{id}/status`;
//! when the protocol surface reads a concrete URI, the path parameters are
//! extracted and become the request payload sent to the resource's request
//! topic.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum UriTemplateError {
    #[error("Unterminated parameter in template segment: {0}")]
    UnterminatedParameter(String),

    #[error("URI {uri} does not match template {template}")]
    Mismatch { template: String, uri: String },
}

/// A parsed `{param}` path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriTemplate {
    template: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Parameter(String),
}

impl UriTemplate {
    pub fn parse(template: &str) -> Result<Self, UriTemplateError> {
        let segments = template
            .split('/')
            .map(|segment| {
                if let Some(inner) = segment.strip_prefix('{') {
                    match inner.strip_suffix('}') {
                        Some(name) => Ok(Segment::Parameter(name.to_string())),
                        None => Err(UriTemplateError::UnterminatedParameter(segment.to_string())),
                    }
                } else {
                    Ok(Segment::Literal(segment.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Names of the template's parameters, in path order.
    pub fn parameter_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Parameter(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Extract path parameters from a concrete URI as a JSON object.
    pub fn extract(&self, uri: &str) -> Result<Map<String, Value>, UriTemplateError> {
        let parts: Vec<&str> = uri.split('/').collect();
        if parts.len() != self.segments.len() {
            return Err(self.mismatch(uri));
        }

        let mut params = Map::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if lit == part => {}
                Segment::Literal(_) => return Err(self.mismatch(uri)),
                Segment::Parameter(name) => {
                    params.insert(name.clone(), Value::String(part.to_string()));
                }
            }
        }

        Ok(params)
    }

    /// Whether a concrete URI matches this template.
    pub fn matches(&self, uri: &str) -> bool {
        self.extract(uri).is_ok()
    }

    fn mismatch(&self, uri: &str) -> UriTemplateError {
        UriTemplateError::Mismatch {
            template: self.template.clone(),
            uri: uri.to_string(),
        }
    }
}
