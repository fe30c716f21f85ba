//! # Bridge Proxy - Topic-Backed Tools on a Protocol Surface
//!
//! ## Purpose
//! The bridge core: mirrors the registration topic, routes request/response
//! pairs by correlation id, and keeps the protocol surface in step with the
//! registry. Broker and schema registry access stay behind the trait seams
//! in `bridge_broker` and `bridge_codec`.
//!
//! ## Architecture Role
//!
//! ```text
//! registry topic ─► ServiceRegistry ─► RegistrationCoordinator ─► ToolSurface
//!                                              │
//!                                        handler bindings
//!                                              │
//! request/response topics ◄──────────► CorrelationRouter
//! ```
//!
//! ## Startup Order
//! 1. `ServiceRegistry::new` and `CorrelationRouter::start`
//! 2. `RegistrationCoordinator::start` (installs the change listener)
//! 3. `ServiceRegistry::start` (replays; bindings appear for existing
//!    registrations before it returns control)

pub mod config;
pub mod coordinator;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod surface;

pub use config::{ConfigError, ProxyConfig};
pub use coordinator::{CoordinatorError, RegistrationCoordinator};
pub use handlers::{ResourceBinding, ToolBinding};
pub use registry::{ChangeListener, RegistryChange, RegistryError, ServiceRegistry};
pub use router::{CorrelationRouter, DuplicatePolicy, RouterError, RouterSettings};
pub use surface::{
    LocalSurface, ResourceCallback, ResourceContent, ResourceSpec, SurfaceError, ToolCallback,
    ToolSpec, ToolSurface,
};
