//! Nebula operator - reconciles NebulaCluster resources into running graph
//! database clusters
//!
//! A NebulaCluster declares three components that depend on each other:
//! metadata (metad), storage (storaged) and an optional graph query layer
//! (graphd). Each runs as a StatefulSet. The controller drives the live
//! workloads toward the declared state one dependency layer at a time and
//! reports progress through per-component phases and a single Ready
//! condition.
//!
//! # Modules
//!
//! - [`crd`] - NebulaCluster custom resource and status types
//! - [`phase`] - Per-component phase classification
//! - [`condition`] - Roll-up of component states into the Ready condition
//! - [`workload`] - Desired workload generation and live workload observation
//! - [`controller`] - Planning and reconciliation logic
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Controller settings
//! - [`retry`] - Backoff and timeout helpers
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod condition;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod phase;
pub mod retry;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Operator Constants
// =============================================================================

/// Field manager used for server-side apply and as the event reporter
pub const FIELD_MANAGER: &str = "nebula-operator";

/// Finalizer guarding volume reclaim on cluster deletion
pub const FINALIZER: &str = "apps.nebula-graph.io/pv-reclaim";
