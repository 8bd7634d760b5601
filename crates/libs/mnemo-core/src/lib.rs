//! # mnemo-core: domain logic and data access for the engineering-memory platform
//!
//! This crate provides the storage layer shared by the SCM sync engine, the
//! memory gateway, and the outbox worker:
//!
//! - **BMC Layer**: stateless controllers (`XxxBmc`) for all database
//!   operations, one per relation
//! - **ModelManager**: central owner of the database connection and the
//!   artifact store
//! - **Identity**: canonical source IDs, evidence URIs, and correlation IDs
//! - **Artifacts**: content-addressed artifact store with the SCM path
//!   schema (new layout plus legacy fallback)
//!
//! The database is treated as the only shared state in the system; every
//! multi-row transition is a single conditional statement whose
//! affected-row count decides ownership.

/// Error types and Result alias for mnemo-core operations.
pub mod error;

/// Canonical identity strings: source IDs, evidence URIs, correlation IDs.
pub mod ids;

/// Content-addressed artifact store and the SCM artifact path schema.
pub mod artifact;

/// Backend Model Controllers (BMC) and data models for all entities.
pub mod model;

/// Low-level database access.
pub mod store;

/// Time helpers (UTC `Z`-suffixed timestamps).
pub mod time;

pub use error::{Error, ErrorCategory, Result};
pub use model::ModelManager;
