//! # API Management Library
//!
//! Management plane for API definitions: import/export of definition documents reconciled
//! against persisted state, identity resolution of members and group/role mapping of
//! externally authenticated users.
//!
//! ## Module Layout
//! - `core`: error type, configuration and persisted data structures
//! - `definition`: parsing of JSON/YAML definition documents
//! - `identity`: chain of identity lookups (in-memory, LDAP, OAuth2 registry)
//! - `repository`: persistence ports and their in-memory implementation
//! - `reconcile`: import of a definition into persisted state
//! - `export`: versioned serialization of an API back into a definition
//! - `mapping`: condition expressions and group/role assignment
//! - `auth`: OAuth2 external login
//! - `admin`: HTTP surface
//! - `observability`: logging and metrics

/// Error types, configuration and persisted data structures
pub mod core;

/// Definition document parsing
pub mod definition;

/// Identity providers and the resolution chain
pub mod identity;

/// Persistence ports
pub mod repository;

/// Definition import
pub mod reconcile;

/// Versioned export
pub mod export;

/// Group and role mapping
pub mod mapping;

/// External authentication
pub mod auth;

/// Admin HTTP API
pub mod admin;

/// Logging and metrics
pub mod observability;

pub use core::config::ManagementConfig;
pub use core::error::{ManagementError, ManagementResult};
pub use export::{ExportVersion, SerializerChain};
pub use reconcile::ApiReconciler;
