//! Custom Resource Definitions for the Nebula operator
//!
//! The NebulaCluster CRD, its per-component descriptors and the status
//! types the reconciler persists.

mod cluster;
mod component;
mod status;

pub use cluster::{
    NebulaCluster, NebulaClusterSpec, NebulaClusterStatus, WorkloadReference, DEFAULT_PULL_POLICY,
    DEFAULT_SCHEDULER, DEFAULT_UPDATE_POLICY, STATEFULSET_REFERENCE,
};
pub use component::{Component, ComponentSpec, ServiceSpec, StorageClaim, DEFAULT_VERSION};
pub use status::{
    ComponentPhase, ComponentStatus, ConditionStatus, NebulaClusterCondition, WorkloadStatus,
    CONDITION_READY,
};
