//! # Bridge Type System - Registration Data Model
//!
//! ## Purpose
//! Defines the wire-level data model shared by every component of the topic
//! bridge: registration descriptors, their topic-keyed identity, and the URI
//! template used for resource reads. These types are the payloads of the
//! compacted registry topic and the contract between the registry, the
//! coordinator, and the external protocol surface.
//!
//! ## Integration Points
//! - **RegistrationKey**: record key of the registry topic (`{"name": ...}`)
//! - **Registration**: record value; a tool or resource descriptor
//! - **UriTemplate**: `{param}` path matching for resource registrations
//!
//! All registration types are immutable once constructed; updates replace the
//! whole descriptor, matching last-write-wins log compaction semantics.

pub mod registration;
pub mod uri;

pub use registration::{Registration, RegistrationKey, ResourceRegistration, ToolRegistration};
pub use uri::{UriTemplate, UriTemplateError};
