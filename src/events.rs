//! Kubernetes Event recording for the NebulaCluster controller.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so that the reconciler can emit standard Kubernetes Events visible via
//! `kubectl describe nebulacluster`.
//!
//! Events are **fire-and-forget**: failures are logged as warnings and never
//! propagate errors. A failed event must never break reconciliation, and a
//! slow API server must never stall it: [`BoundedEventPublisher`] caps how
//! long a single publish may take.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "ComponentScaling")
    /// * `action` - What action was taken (e.g. "Scale")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that gives up on an event after a fixed time.
pub struct BoundedEventPublisher<P> {
    inner: P,
    timeout: Duration,
}

impl<P: EventPublisher> BoundedEventPublisher<P> {
    /// Wrap `inner`, abandoning any publish that runs longer than `timeout`
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<P: EventPublisher> EventPublisher for BoundedEventPublisher<P> {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let publish = self.inner.publish(resource_ref, type_, reason, action, note);
        if tokio::time::timeout(self.timeout, publish).await.is_err() {
            warn!(
                reason,
                action,
                timeout = ?self.timeout,
                "Timed out publishing Kubernetes event"
            );
        }
    }
}

/// No-op implementation for tests.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// A component's workload was created
    pub const COMPONENT_CREATED: &str = "ComponentCreated";
    /// A component's replica count is being changed
    pub const COMPONENT_SCALING: &str = "ComponentScaling";
    /// A component's version is being changed
    pub const COMPONENT_UPGRADING: &str = "ComponentUpgrading";
    /// A component's template is being rolled out
    pub const COMPONENT_UPDATING: &str = "ComponentUpdating";
    /// Writing a component's resources failed
    pub const APPLY_FAILED: &str = "ApplyFailed";
    /// Spec validation failed
    pub const INVALID_SPEC: &str = "InvalidSpec";
    /// Workload observation kept failing
    pub const OBSERVATION_FAILED: &str = "ObservationFailed";
    /// Every component is settled and ready
    pub const CLUSTER_READY: &str = "ClusterReady";
    /// PersistentVolumeClaims were deleted with the cluster
    pub const VOLUMES_RECLAIMED: &str = "VolumesReclaimed";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Creating a component
    pub const CREATE: &str = "Create";
    /// Scaling a component
    pub const SCALE: &str = "Scale";
    /// Upgrading a component
    pub const UPGRADE: &str = "Upgrade";
    /// Rolling out a template change
    pub const UPDATE: &str = "Update";
    /// Deleting cluster resources
    pub const DELETE: &str = "Delete";
}
