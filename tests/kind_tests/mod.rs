//! Integration tests for the Nebula operator
//!
//! These tests require a Kubernetes cluster (kind) to run and tell the story
//! of how database operators interact with NebulaCluster resources.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating, reading and updating
//!   NebulaCluster resources through the Kubernetes API
//!
//! - `reconcile_flow`: Stories about single reconciliation passes run
//!   against the real API server (workload creation, ordering, deletion)
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod crd_operations;
mod helpers;
mod reconcile_flow;
