//! Reads the live state of a component's StatefulSet and pods

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

use super::{CONFIG_HASH_ANNOTATION, REVISION_HASH_LABEL, SPEC_HASH_ANNOTATION};
use crate::crd::WorkloadStatus;

/// Live state of one component's workload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveWorkload {
    /// Status as reported by the workload controller
    pub status: WorkloadStatus,
    /// Generation of the StatefulSet object
    pub generation: i64,
    /// Replicas requested in the live spec
    pub spec_replicas: Option<i32>,
    /// Image tag of the daemon container in the pod template
    pub template_version: Option<String>,
    /// Config hash stamped on the pod template
    pub config_hash: Option<String>,
    /// Spec hash stamped on the StatefulSet
    pub spec_hash: Option<String>,
}

impl LiveWorkload {
    /// The workload controller has caught up and every replica runs the
    /// update revision
    pub fn is_settled(&self) -> bool {
        self.status.observed_generation >= self.generation
            && self.status.revisions_match()
            && self.status.updated_replicas == self.status.replicas
    }
}

/// Derive a [`LiveWorkload`] from a StatefulSet and the pods it selects.
///
/// `updatedReadyReplicas` is not reported by the StatefulSet controller; it
/// is counted from pods stamped with the update revision whose Ready
/// condition is True.
pub fn observe_workload(sts: &StatefulSet, pods: &[Pod]) -> LiveWorkload {
    let status = sts.status.clone().unwrap_or_default();
    let update_revision = status.update_revision.clone().unwrap_or_default();
    let updated_replicas = status.updated_replicas.unwrap_or(0);

    let updated_ready = pods
        .iter()
        .filter(|pod| {
            !update_revision.is_empty()
                && pod
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(REVISION_HASH_LABEL))
                    .is_some_and(|rev| *rev == update_revision)
        })
        .filter(|pod| is_pod_ready(pod))
        .count();
    let updated_ready = i32::try_from(updated_ready)
        .unwrap_or(i32::MAX)
        .min(updated_replicas);

    let spec = sts.spec.as_ref();
    let template = spec.map(|s| &s.template);
    let daemon_image = template
        .and_then(|t| t.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.as_deref());

    LiveWorkload {
        status: WorkloadStatus {
            observed_generation: status.observed_generation.unwrap_or(0),
            ready_replicas: status.ready_replicas.unwrap_or(0),
            replicas: status.replicas,
            updated_replicas,
            updated_ready_replicas: updated_ready,
            collision_count: status.collision_count,
            current_revision: status.current_revision.unwrap_or_default(),
            update_revision,
        },
        generation: sts.metadata.generation.unwrap_or(0),
        spec_replicas: spec.and_then(|s| s.replicas),
        template_version: daemon_image.and_then(image_tag).map(str::to_string),
        config_hash: template
            .and_then(|t| t.metadata.as_ref())
            .and_then(|m| m.annotations.as_ref())
            .and_then(|a| a.get(CONFIG_HASH_ANNOTATION))
            .cloned(),
        spec_hash: sts
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SPEC_HASH_ANNOTATION))
            .cloned(),
    }
}

fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Tag of an image reference, ignoring registry ports and digests.
///
/// `registry:5000/vesoft/nebula-graphd:v3.6.0` yields `v3.6.0`; an image
/// without a tag yields `None`.
pub fn image_tag(image: &str) -> Option<&str> {
    let without_digest = image.split('@').next().unwrap_or(image);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last_segment
        .split_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.is_empty())
}
