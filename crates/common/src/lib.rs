#![deny(missing_docs)]

//! Shared configuration, error types, IDs, and observability primitives for GridMR crates.
//!
//! Architecture role:
//! - defines the fault-handling policy passed to every job coordinator
//! - provides common [`GmrError`] / [`Result`] contracts
//! - hosts the coordinator metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

/// Fault policy and environment helpers.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Strongly-typed identifier wrappers.
pub mod ids;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;

pub use config::FaultPolicy;
pub use error::{GmrError, Result};
pub use ids::*;
pub use metrics::MetricsRegistry;
