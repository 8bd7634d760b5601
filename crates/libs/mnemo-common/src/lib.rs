//! # mnemo-common: shared configuration and process setup
//!
//! Crates in the workspace pull their configuration sections and the
//! tracing bootstrap from here so that binaries stay thin.

pub mod config;
pub mod tracing;

pub use config::AppConfig;
