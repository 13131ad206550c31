//! Pure planning step of a reconciliation pass
//!
//! [`plan`] turns the desired cluster and one observation of its workloads
//! into the status to persist and the ordered list of actions to execute.
//! It performs no I/O; the reconciler executes the actions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::condition;
use crate::crd::{Component, ComponentSpec, ComponentStatus, NebulaCluster, NebulaClusterStatus};
use crate::phase::{classify, ObservedComponent};
use crate::workload::{ComponentResources, LiveWorkload, WorkloadCompiler};
use crate::Error;

/// Live workloads of one cluster, keyed by component.
///
/// A declared component with no workload maps to `None`.
pub type ClusterObservation = BTreeMap<Component, Option<LiveWorkload>>;

/// Kind of desired-state change an apply carries
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// The workload does not exist yet
    Create,
    /// Replica count differs
    Scale {
        /// Live replica count
        from: i32,
        /// Desired replica count
        to: i32,
    },
    /// Image version differs
    Upgrade {
        /// Live template version
        from: String,
        /// Desired version
        to: String,
    },
    /// Any other template change
    Update,
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Scale { from, to } => write!(f, "scale {} -> {}", from, to),
            Self::Upgrade { from, to } => write!(f, "upgrade {} -> {}", from, to),
            Self::Update => write!(f, "update"),
        }
    }
}

/// One step of a reconciliation pass
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    /// Write the component's desired resources
    Apply {
        /// Target component
        component: Component,
        /// What the write changes
        change: Change,
        /// Resources to apply
        resources: Box<ComponentResources>,
    },
    /// A change is pending but an upstream component is not available
    Wait {
        /// Component with the pending change
        component: Component,
        /// Upstream component it waits for
        blocked_on: Component,
    },
}

impl Action {
    /// Component the action concerns
    pub fn component(&self) -> Component {
        match self {
            Self::Apply { component, .. } | Self::Wait { component, .. } => *component,
        }
    }

    /// Whether this action writes to the platform
    pub fn is_apply(&self) -> bool {
        matches!(self, Self::Apply { .. })
    }
}

/// Outcome of planning one pass
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcilePlan {
    /// Actions in dependency order
    pub actions: Vec<Action>,
    /// Status to persist
    pub status: NebulaClusterStatus,
}

impl ReconcilePlan {
    /// Components with an apply in this plan
    pub fn applied(&self) -> impl Iterator<Item = Component> + '_ {
        self.actions
            .iter()
            .filter(|a| a.is_apply())
            .map(Action::component)
    }
}

/// Plan one reconciliation pass.
///
/// Components are visited metadata → storage → graph. Each is classified
/// and its status recorded. A component whose live workload drifts from the
/// desired resources gets an apply only while every upstream component is
/// available and unchanged in this pass; otherwise it waits.
pub fn plan(
    cluster: &NebulaCluster,
    observation: &ClusterObservation,
    now: DateTime<Utc>,
) -> Result<ReconcilePlan, Error> {
    let previous = cluster.status.clone().unwrap_or_default();
    let mut status = NebulaClusterStatus {
        conditions: previous.conditions.clone(),
        observed_generation: cluster.metadata.generation,
        ..Default::default()
    };

    let mut actions = Vec::new();
    let mut gate: Option<Component> = None;

    for (component, spec) in cluster.spec.components() {
        let live = observation.get(&component).and_then(Option::as_ref);
        let observed = ObservedComponent::new(live, previous.component(component));
        let phase = classify(spec, &observed);
        let component_status = ComponentStatus {
            version: observed.running_version.clone(),
            phase: Some(phase),
            workload: observed.status.clone(),
        };

        let resources = WorkloadCompiler::compile(cluster, component)?;
        if let Some(change) = detect_change(spec, live, &resources, &component_status) {
            match gate {
                Some(blocked_on) => actions.push(Action::Wait {
                    component,
                    blocked_on,
                }),
                None => {
                    actions.push(Action::Apply {
                        component,
                        change,
                        resources: Box::new(resources),
                    });
                    gate = Some(component);
                }
            }
        }

        if gate.is_none() && !component_status.is_available() {
            gate = Some(component);
        }
        *status.component_mut(component) = component_status;
    }

    let declared: Vec<Component> = cluster.spec.components().map(|(c, _)| c).collect();
    let ready = condition::aggregate(
        declared.iter().map(|c| (*c, status.component(*c))),
        previous.ready_condition(),
        now,
    );
    status.set_condition(ready);

    Ok(ReconcilePlan { actions, status })
}

/// Compare desired resources with the live workload.
///
/// A version change takes precedence over a replica change; both are
/// written by the same apply.
fn detect_change(
    spec: &ComponentSpec,
    live: Option<&LiveWorkload>,
    resources: &ComponentResources,
    status: &ComponentStatus,
) -> Option<Change> {
    let Some(live) = live else {
        return Some(Change::Create);
    };

    if live.spec_hash.as_deref() != Some(resources.spec_hash.as_str()) {
        let desired = spec.version_or_default();
        let current = live
            .template_version
            .as_deref()
            .or(status.version.as_deref());
        return Some(match current {
            Some(from) if from != desired => Change::Upgrade {
                from: from.to_string(),
                to: desired.to_string(),
            },
            _ => Change::Update,
        });
    }

    match (spec.replicas, live.spec_replicas) {
        (Some(to), from) if from != Some(to) => Some(Change::Scale {
            from: from.unwrap_or(0),
            to,
        }),
        _ => None,
    }
}

/// Re-verify a plan before executing it.
///
/// Every apply must target a component whose upstream components are all
/// available and untouched earlier in the same plan.
pub fn check_ordering(plan: &ReconcilePlan) -> Result<(), Error> {
    let mut applied: Vec<Component> = Vec::new();
    for action in &plan.actions {
        if let Action::Apply { component, .. } = action {
            for upstream in component.upstream() {
                if applied.contains(upstream) {
                    return Err(Error::ordering(format!(
                        "{} applied in the same pass as upstream {}",
                        component, upstream
                    )));
                }
                let upstream_status = plan.status.component(*upstream);
                if upstream_status.phase.is_some() && !upstream_status.is_available() {
                    return Err(Error::ordering(format!(
                        "{} applied while upstream {} is not available",
                        component, upstream
                    )));
                }
            }
            applied.push(*component);
        }
    }
    Ok(())
}
