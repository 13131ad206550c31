//! Roll-up of component states into the cluster Ready condition

use chrono::{DateTime, Utc};

use crate::crd::{
    Component, ComponentPhase, ComponentStatus, ConditionStatus, NebulaClusterCondition,
    CONDITION_READY,
};

/// Reason recorded when observation keeps failing past the retry ceiling
pub const REASON_OBSERVATION_FAILED: &str = "ObservationFailed";
/// Reason recorded before the first successful observation
pub const REASON_OBSERVATION_PENDING: &str = "ObservationPending";
/// Reason recorded when the spec is rejected
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

/// Compute the Ready condition from per-component statuses.
///
/// `components` must be in dependency order; the first component that is
/// not settled becomes the reason. Checks run revision, then phase, then
/// readiness.
pub fn aggregate<'a>(
    components: impl IntoIterator<Item = (Component, &'a ComponentStatus)>,
    previous: Option<&NebulaClusterCondition>,
    now: DateTime<Utc>,
) -> NebulaClusterCondition {
    for (component, status) in components {
        if let Some(message) = unsatisfied(component, status) {
            return NebulaClusterCondition::new(
                CONDITION_READY,
                ConditionStatus::False,
                component.as_str(),
                message,
                previous,
                now,
            );
        }
    }
    NebulaClusterCondition::new(
        CONDITION_READY,
        ConditionStatus::True,
        "",
        "",
        previous,
        now,
    )
}

fn unsatisfied(component: Component, status: &ComponentStatus) -> Option<String> {
    let workload = &status.workload;
    if !workload.revisions_match() {
        return Some(format!(
            "{} revision mismatch: current {} != update {} ({}/{} updated)",
            component,
            display_revision(&workload.current_revision),
            display_revision(&workload.update_revision),
            workload.updated_replicas,
            workload.replicas
        ));
    }
    match status.phase {
        Some(ComponentPhase::Running) => {}
        Some(phase) => return Some(format!("{} phase is {}", component, phase)),
        None => return Some(format!("{} phase is not yet known", component)),
    }
    if workload.ready_replicas < workload.replicas {
        return Some(format!(
            "{} replicas not ready: {}/{}",
            component, workload.ready_replicas, workload.replicas
        ));
    }
    None
}

fn display_revision(revision: &str) -> &str {
    if revision.is_empty() {
        "<none>"
    } else {
        revision
    }
}

/// Ready=Unknown, used only before any component was ever observed
pub fn unknown(
    message: impl Into<String>,
    previous: Option<&NebulaClusterCondition>,
    now: DateTime<Utc>,
) -> NebulaClusterCondition {
    NebulaClusterCondition::new(
        CONDITION_READY,
        ConditionStatus::Unknown,
        REASON_OBSERVATION_PENDING,
        message,
        previous,
        now,
    )
}

/// Ready=False after observation failed too many times in a row
pub fn observation_failed(
    message: impl Into<String>,
    previous: Option<&NebulaClusterCondition>,
    now: DateTime<Utc>,
) -> NebulaClusterCondition {
    NebulaClusterCondition::new(
        CONDITION_READY,
        ConditionStatus::False,
        REASON_OBSERVATION_FAILED,
        message,
        previous,
        now,
    )
}

/// Ready=False for a spec that failed validation
pub fn invalid_spec(
    message: impl Into<String>,
    previous: Option<&NebulaClusterCondition>,
    now: DateTime<Utc>,
) -> NebulaClusterCondition {
    NebulaClusterCondition::new(
        CONDITION_READY,
        ConditionStatus::False,
        REASON_INVALID_SPEC,
        message,
        previous,
        now,
    )
}
