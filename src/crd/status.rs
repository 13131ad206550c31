//! Observed-state types: component phases, workload status and conditions

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Type of the cluster-wide readiness condition
pub const CONDITION_READY: &str = "Ready";

/// Lifecycle state of one component, recomputed every pass
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ComponentPhase {
    /// Steady state, no pending change
    Running,
    /// Version change in progress
    Upgrade,
    /// Reducing replicas
    ScaleIn,
    /// Increasing replicas
    ScaleOut,
    /// Non-version, non-replica change rolling out
    Update,
}

impl std::fmt::Display for ComponentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Upgrade => write!(f, "Upgrade"),
            Self::ScaleIn => write!(f, "ScaleIn"),
            Self::ScaleOut => write!(f, "ScaleOut"),
            Self::Update => write!(f, "Update"),
        }
    }
}

/// Live state of a component's replicated workload
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    /// Most recent workload generation observed by its controller
    #[serde(default, skip_serializing_if = "is_zero_i64")]
    pub observed_generation: i64,

    /// Number of ready replicas
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub ready_replicas: i32,

    /// Most recently observed number of replicas
    #[serde(default)]
    pub replicas: i32,

    /// Number of replicas at the update revision
    #[serde(default)]
    pub updated_replicas: i32,

    /// Number of ready replicas at the update revision
    #[serde(default, skip_serializing_if = "is_zero_i32")]
    pub updated_ready_replicas: i32,

    /// Count of name collisions while creating revisions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_count: Option<i32>,

    /// Revision the existing replicas were created from
    #[serde(default)]
    pub current_revision: String,

    /// Revision new replicas are created from
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update_revision: String,
}

impl WorkloadStatus {
    /// Current and update revisions agree
    pub fn revisions_match(&self) -> bool {
        self.current_revision == self.update_revision
    }

    /// Every replica runs the update revision and is ready
    pub fn rollout_complete(&self) -> bool {
        self.updated_replicas == self.replicas && self.updated_ready_replicas == self.replicas
    }
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

/// Running version, phase and workload status of one component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Version the current revision runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Classified phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ComponentPhase>,

    /// Observed workload status
    #[serde(default)]
    pub workload: WorkloadStatus,
}

impl ComponentStatus {
    /// Running, settled on one revision and fully ready; downstream
    /// components may only be changed while this holds.
    pub fn is_available(&self) -> bool {
        self.phase == Some(ComponentPhase::Running)
            && self.workload.revisions_match()
            && self.workload.ready_replicas == self.workload.replicas
    }
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Map a boolean onto True/False
    pub fn from_bool(value: bool) -> Self {
        if value {
            Self::True
        } else {
            Self::False
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A named, timestamped assertion about overall cluster health
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NebulaClusterCondition {
    /// Type of condition (currently only Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Last time the condition was evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    /// Last time the status value changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl NebulaClusterCondition {
    /// Create a condition evaluated at `now`.
    ///
    /// The transition time is carried over from `previous` when the status
    /// value is unchanged.
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        previous: Option<&NebulaClusterCondition>,
        now: DateTime<Utc>,
    ) -> Self {
        let last_transition_time = match previous {
            Some(prev) if prev.status == status => prev.last_transition_time.or(Some(now)),
            _ => Some(now),
        };
        Self {
            type_: type_.into(),
            status,
            last_update_time: Some(now),
            last_transition_time,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Equal apart from timestamps
    pub fn same_assertion(&self, other: &NebulaClusterCondition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn phases_serialize_as_their_names() {
        for phase in [
            ComponentPhase::Running,
            ComponentPhase::Upgrade,
            ComponentPhase::ScaleIn,
            ComponentPhase::ScaleOut,
            ComponentPhase::Update,
        ] {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase));
        }
    }

    #[test]
    fn workload_status_uses_camel_case_fields() {
        let status = WorkloadStatus {
            replicas: 3,
            ready_replicas: 3,
            updated_replicas: 3,
            updated_ready_replicas: 3,
            current_revision: "nc-graphd-7d9f".to_string(),
            update_revision: "nc-graphd-7d9f".to_string(),
            collision_count: Some(1),
            observed_generation: 4,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["updatedReadyReplicas"], 3);
        assert_eq!(json["currentRevision"], "nc-graphd-7d9f");
        assert_eq!(json["collisionCount"], 1);
        assert!(status.revisions_match());
        assert!(status.rollout_complete());
    }

    #[test]
    fn rollout_is_incomplete_while_updated_replicas_are_not_ready() {
        let status = WorkloadStatus {
            replicas: 3,
            updated_replicas: 3,
            updated_ready_replicas: 2,
            ..Default::default()
        };
        assert!(!status.rollout_complete());
    }

    #[test]
    fn availability_requires_running_settled_and_ready() {
        let mut status = ComponentStatus {
            version: Some("v3.6.0".to_string()),
            phase: Some(ComponentPhase::Running),
            workload: WorkloadStatus {
                replicas: 3,
                ready_replicas: 3,
                current_revision: "r1".to_string(),
                update_revision: "r1".to_string(),
                ..Default::default()
            },
        };
        assert!(status.is_available());

        status.workload.ready_replicas = 2;
        assert!(!status.is_available());

        status.workload.ready_replicas = 3;
        status.workload.update_revision = "r2".to_string();
        assert!(!status.is_available());

        status.workload.update_revision = "r1".to_string();
        status.phase = None;
        assert!(!status.is_available());
    }

    #[test]
    fn transition_time_is_kept_while_status_is_unchanged() {
        let first = NebulaClusterCondition::new(
            CONDITION_READY,
            ConditionStatus::False,
            "storage",
            "scaling",
            None,
            t(0),
        );
        let second = NebulaClusterCondition::new(
            CONDITION_READY,
            ConditionStatus::False,
            "graph",
            "upgrading",
            Some(&first),
            t(30),
        );
        assert_eq!(second.last_transition_time, Some(t(0)));
        assert_eq!(second.last_update_time, Some(t(30)));

        let third = NebulaClusterCondition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "",
            "",
            Some(&second),
            t(60),
        );
        assert_eq!(third.last_transition_time, Some(t(60)));
    }

    #[test]
    fn empty_reason_and_message_are_omitted() {
        let cond = NebulaClusterCondition::new(
            CONDITION_READY,
            ConditionStatus::True,
            "",
            "",
            None,
            t(0),
        );
        let json = serde_json::to_value(&cond).unwrap();
        assert!(json.get("reason").is_none());
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
    }
}
