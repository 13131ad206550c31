//! NebulaCluster Custom Resource Definition
//!
//! A NebulaCluster declares the desired state of the three cooperating
//! services of a graph database cluster: the metadata layer (metad), the
//! storage layer (storaged) and the query layer (graphd).

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::LocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::{Component, ComponentSpec};
use super::status::{ComponentStatus, NebulaClusterCondition, CONDITION_READY};

/// Default scheduler for component pods
pub const DEFAULT_SCHEDULER: &str = "default-scheduler";
/// Default image pull policy
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
/// Default update policy
pub const DEFAULT_UPDATE_POLICY: &str = "RollingUpdate";
/// The only supported workload kind
pub const STATEFULSET_REFERENCE: &str = "statefulsets.apps";

const PULL_POLICIES: [&str; 3] = ["Always", "IfNotPresent", "Never"];
// OnDelete rollouts only advance on manual pod deletion
const UPDATE_POLICIES: [&str; 1] = [DEFAULT_UPDATE_POLICY];

/// Specification for a NebulaCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "apps.nebula-graph.io",
    version = "v1alpha1",
    kind = "NebulaCluster",
    plural = "nebulaclusters",
    shortname = "nc",
    status = "NebulaClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"GRAPHD-DESIRED","type":"string","jsonPath":".spec.graphd.replicas","description":"The desired number of graphd pods."}"#,
    printcolumn = r#"{"name":"GRAPHD-READY","type":"string","jsonPath":".status.graphd.workload.readyReplicas","description":"The number of graphd pods ready."}"#,
    printcolumn = r#"{"name":"METAD-DESIRED","type":"string","jsonPath":".spec.metad.replicas","description":"The desired number of metad pods."}"#,
    printcolumn = r#"{"name":"METAD-READY","type":"string","jsonPath":".status.metad.workload.readyReplicas","description":"The number of metad pods ready."}"#,
    printcolumn = r#"{"name":"STORAGED-DESIRED","type":"string","jsonPath":".spec.storaged.replicas","description":"The desired number of storaged pods."}"#,
    printcolumn = r#"{"name":"STORAGED-READY","type":"string","jsonPath":".status.storaged.workload.readyReplicas","description":"The number of storaged pods ready."}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NebulaClusterSpec {
    /// Query layer; required for client access
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphd: Option<ComponentSpec>,

    /// Metadata layer (required)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metad: Option<ComponentSpec>,

    /// Storage layer (required)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storaged: Option<ComponentSpec>,

    /// Workload kind realizing each component
    #[serde(default)]
    pub reference: WorkloadReference,

    /// Scheduler for component pods
    #[serde(default = "default_scheduler")]
    pub scheduler_name: String,

    /// Delete PersistentVolumeClaims when the cluster is deleted
    #[serde(default, rename = "enablePVReclaim", skip_serializing_if = "Option::is_none")]
    pub enable_pv_reclaim: Option<bool>,

    /// Image pull policy (Always, IfNotPresent, Never)
    #[serde(default = "default_pull_policy")]
    pub image_pull_policy: String,

    /// Secrets for pulling component images
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    /// Node selector for component pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// How pods are replaced when the template changes; only RollingUpdate
    /// is supported
    #[serde(default, rename = "strategy", skip_serializing_if = "String::is_empty")]
    pub update_policy: String,
}

fn default_scheduler() -> String {
    DEFAULT_SCHEDULER.to_string()
}

fn default_pull_policy() -> String {
    DEFAULT_PULL_POLICY.to_string()
}

impl NebulaClusterSpec {
    /// Descriptor for a component, if declared
    pub fn component(&self, component: Component) -> Option<&ComponentSpec> {
        match component {
            Component::Metad => self.metad.as_ref(),
            Component::Storaged => self.storaged.as_ref(),
            Component::Graphd => self.graphd.as_ref(),
        }
    }

    /// Declared components in dependency order
    pub fn components(&self) -> impl Iterator<Item = (Component, &ComponentSpec)> {
        Component::ALL
            .into_iter()
            .filter_map(|c| self.component(c).map(|spec| (c, spec)))
    }

    /// Whether PersistentVolumeClaims are reclaimed on deletion
    pub fn reclaims_volumes(&self) -> bool {
        self.enable_pv_reclaim.unwrap_or(false)
    }

    /// Update policy, falling back to RollingUpdate
    pub fn update_policy_or_default(&self) -> &str {
        if self.update_policy.is_empty() {
            DEFAULT_UPDATE_POLICY
        } else {
            &self.update_policy
        }
    }

    /// Validate the cluster specification
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.metad.is_none() {
            return Err(crate::Error::validation("spec.metad is required"));
        }
        if self.storaged.is_none() {
            return Err(crate::Error::validation("spec.storaged is required"));
        }

        for (component, spec) in self.components() {
            spec.validate(&format!("spec.{}", component.daemon()))?;
        }

        if !self.reference.name.is_empty() && self.reference.name != STATEFULSET_REFERENCE {
            return Err(crate::Error::validation(format!(
                "spec.reference.name '{}' is not supported, only '{}'",
                self.reference.name, STATEFULSET_REFERENCE
            )));
        }

        if !PULL_POLICIES.contains(&self.image_pull_policy.as_str()) {
            return Err(crate::Error::validation(format!(
                "spec.imagePullPolicy must be one of {:?}, got '{}'",
                PULL_POLICIES, self.image_pull_policy
            )));
        }

        if !self.update_policy.is_empty() && !UPDATE_POLICIES.contains(&self.update_policy.as_str())
        {
            return Err(crate::Error::validation(format!(
                "spec.strategy must be one of {:?}, got '{}'",
                UPDATE_POLICIES, self.update_policy
            )));
        }

        Ok(())
    }
}

/// Reference to the workload kind, e.g. `statefulsets.apps`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct WorkloadReference {
    /// Name of the workload CustomResourceDefinition or built-in kind
    #[serde(default)]
    pub name: String,

    /// Version to use when the kind serves several
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Status for a NebulaCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NebulaClusterStatus {
    /// Query layer status
    #[serde(default)]
    pub graphd: ComponentStatus,

    /// Metadata layer status
    #[serde(default)]
    pub metad: ComponentStatus,

    /// Storage layer status
    #[serde(default)]
    pub storaged: ComponentStatus,

    /// Cluster conditions, at most one per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<NebulaClusterCondition>,

    /// Spec generation this status was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl NebulaClusterStatus {
    /// Status of a component
    pub fn component(&self, component: Component) -> &ComponentStatus {
        match component {
            Component::Metad => &self.metad,
            Component::Storaged => &self.storaged,
            Component::Graphd => &self.graphd,
        }
    }

    /// Mutable status of a component
    pub fn component_mut(&mut self, component: Component) -> &mut ComponentStatus {
        match component {
            Component::Metad => &mut self.metad,
            Component::Storaged => &mut self.storaged,
            Component::Graphd => &mut self.graphd,
        }
    }

    /// The Ready condition, if recorded
    pub fn ready_condition(&self) -> Option<&NebulaClusterCondition> {
        self.condition(CONDITION_READY)
    }

    /// A condition by type
    pub fn condition(&self, type_: &str) -> Option<&NebulaClusterCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Record a condition, replacing any existing one of the same type.
    /// The most recent condition is last.
    pub fn set_condition(&mut self, condition: NebulaClusterCondition) {
        self.conditions.retain(|c| c.type_ != condition.type_);
        self.conditions.push(condition);
    }

    /// Equal apart from condition timestamps
    pub fn same_state(&self, other: &NebulaClusterStatus) -> bool {
        self.graphd == other.graphd
            && self.metad == other.metad
            && self.storaged == other.storaged
            && self.observed_generation == other.observed_generation
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .zip(&other.conditions)
                .all(|(a, b)| a.same_assertion(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::status::{ComponentPhase, ConditionStatus};
    use chrono::Utc;
    use kube::CustomResourceExt;

    fn sample_spec() -> NebulaClusterSpec {
        let component = |replicas| ComponentSpec {
            replicas: Some(replicas),
            version: Some("v3.6.0".to_string()),
            ..Default::default()
        };
        NebulaClusterSpec {
            graphd: Some(component(2)),
            metad: Some(component(3)),
            storaged: Some(component(5)),
            reference: WorkloadReference::default(),
            scheduler_name: DEFAULT_SCHEDULER.to_string(),
            enable_pv_reclaim: None,
            image_pull_policy: DEFAULT_PULL_POLICY.to_string(),
            image_pull_secrets: vec![],
            node_selector: BTreeMap::new(),
            update_policy: String::new(),
        }
    }

    // =========================================================================
    // Spec Validation Stories
    // =========================================================================

    /// Story: a complete three-layer cluster is accepted
    #[test]
    fn story_complete_cluster_is_valid() {
        assert!(sample_spec().validate().is_ok());
    }

    /// Story: the storage layer cannot run without the metadata layer
    #[test]
    fn story_missing_metadata_layer_is_rejected() {
        let mut spec = sample_spec();
        spec.metad = None;
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("spec.metad is required"));
    }

    /// Story: the storage layer is mandatory for a functioning cluster
    #[test]
    fn story_missing_storage_layer_is_rejected() {
        let mut spec = sample_spec();
        spec.storaged = None;
        assert!(spec.validate().is_err());
    }

    /// Story: a cluster without a query layer is still valid (no client access)
    #[test]
    fn story_query_layer_is_optional() {
        let mut spec = sample_spec();
        spec.graphd = None;
        assert!(spec.validate().is_ok());
        let declared: Vec<_> = spec.components().map(|(c, _)| c).collect();
        assert_eq!(declared, vec![Component::Metad, Component::Storaged]);
    }

    #[test]
    fn negative_replicas_in_any_component_are_rejected() {
        let mut spec = sample_spec();
        if let Some(graphd) = spec.graphd.as_mut() {
            graphd.replicas = Some(-2);
        }
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("spec.graphd.replicas"));
    }

    #[test]
    fn unsupported_workload_reference_is_rejected() {
        let mut spec = sample_spec();
        spec.reference.name = "clonesets.apps.kruise.io".to_string();
        assert!(spec.validate().is_err());

        spec.reference.name = STATEFULSET_REFERENCE.to_string();
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn pull_and_update_policies_are_enumerated() {
        let mut spec = sample_spec();
        spec.image_pull_policy = "Sometimes".to_string();
        assert!(spec.validate().is_err());

        let mut spec = sample_spec();
        spec.update_policy = "Recreate".to_string();
        assert!(spec.validate().is_err());

        spec.update_policy = "RollingUpdate".to_string();
        assert!(spec.validate().is_ok());
    }

    /// Story: an OnDelete strategy is refused up front instead of leaving
    /// every rollout waiting for pods nobody deletes
    #[test]
    fn story_on_delete_strategy_is_rejected() {
        let spec: NebulaClusterSpec = serde_json::from_str(
            r#"{"metad": {}, "storaged": {}, "strategy": "OnDelete"}"#,
        )
        .unwrap();
        let err = spec.validate().unwrap_err();
        assert!(matches!(err, crate::Error::Validation(_)));
        assert!(err.to_string().contains("spec.strategy"));
        assert!(err.to_string().contains("OnDelete"));
    }

    #[test]
    fn defaults_follow_the_declarative_api() {
        let spec: NebulaClusterSpec =
            serde_json::from_str(r#"{"metad": {}, "storaged": {}}"#).unwrap();
        assert_eq!(spec.scheduler_name, "default-scheduler");
        assert_eq!(spec.image_pull_policy, "IfNotPresent");
        assert_eq!(spec.update_policy_or_default(), "RollingUpdate");
        assert!(!spec.reclaims_volumes());
        assert!(spec.graphd.is_none());
    }

    #[test]
    fn pv_reclaim_and_strategy_use_original_field_names() {
        let spec: NebulaClusterSpec = serde_json::from_str(
            r#"{"metad": {}, "storaged": {}, "enablePVReclaim": true, "strategy": "RollingUpdate"}"#,
        )
        .unwrap();
        assert!(spec.reclaims_volumes());
        assert_eq!(spec.update_policy, "RollingUpdate");
    }

    // =========================================================================
    // Status Stories
    // =========================================================================

    #[test]
    fn set_condition_keeps_one_entry_per_type() {
        let mut status = NebulaClusterStatus::default();
        let now = Utc::now();
        status.set_condition(NebulaClusterCondition::new(
            CONDITION_READY,
            ConditionStatus::False,
            "storage",
            "scaling",
            None,
            now,
        ));
        status.set_condition(NebulaClusterCondition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "",
            "",
            None,
            now,
        ));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(
            status.ready_condition().map(|c| c.status),
            Some(ConditionStatus::True)
        );
    }

    #[test]
    fn same_state_ignores_condition_timestamps() {
        let earlier = Utc::now() - chrono::Duration::seconds(60);
        let mut a = NebulaClusterStatus::default();
        a.component_mut(Component::Graphd).phase = Some(ComponentPhase::Running);
        let mut b = a.clone();

        a.set_condition(NebulaClusterCondition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "",
            "",
            None,
            earlier,
        ));
        b.set_condition(NebulaClusterCondition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "",
            "",
            None,
            Utc::now(),
        ));
        assert!(a.same_state(&b));

        b.component_mut(Component::Graphd).phase = Some(ComponentPhase::Upgrade);
        assert!(!a.same_state(&b));
    }

    #[test]
    fn crd_carries_discovery_columns() {
        let crd = NebulaCluster::crd();
        assert_eq!(crd.spec.group, "apps.nebula-graph.io");
        assert_eq!(crd.spec.names.kind, "NebulaCluster");
        assert_eq!(crd.spec.names.short_names, Some(vec!["nc".to_string()]));
        let columns = crd.spec.versions[0]
            .additional_printer_columns
            .clone()
            .unwrap_or_default();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"GRAPHD-DESIRED"));
        assert!(names.contains(&"STORAGED-READY"));
        assert!(names.contains(&"AGE"));
    }
}
