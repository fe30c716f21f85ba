//! # Bridge Codec - Schema Registry Collaborator and Enveloping
//!
//! ## Purpose
//! Everything schema-shaped the bridge core needs: the schema registry
//! collaborator trait, subject naming, compiled JSON schemas with an
//! `envelope` operation that validates a payload before it is published, and
//! the per-registration schema bundle fetched when a tool or resource is
//! bound.
//!
//! ## Architecture Role
//! ```text
//! Registration → RegistrationSchemas::load → 4 subjects fetched/compiled
//!      ↓                                           ↓
//! CorrelationRouter → TopicSchema::envelope → validated wire value → Publisher
//! ```
//!
//! The codec is statically typed per topic: the schema used to envelope a
//! request is chosen once at registration time from the registration's
//! declared subjects, never from a runtime type witness.

pub mod error;
pub mod registry;
pub mod schema;

pub use error::{Result, SchemaError};
pub use registry::{key_subject, value_subject, InMemorySchemaRegistry, SchemaRegistry};
pub use schema::{
    registration_key_schema, registration_value_schema, RegistrationSchemas, TopicSchema,
};
