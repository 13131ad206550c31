//! Controller for NebulaCluster resources
//!
//! Controllers follow the Kubernetes controller pattern with observe-plan-act
//! loops. [`plan`] holds the pure decision step; the reconciler executes it.

mod cluster;
pub mod plan;

pub use cluster::{
    error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl,
};
