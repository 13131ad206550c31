//! Phase classification for a single component
//!
//! [`classify`] is a pure, total function. When several conditions hold at
//! once the first matching rule wins:
//!
//! 1. A rollout is in flight or pending: **Upgrade** if the version changed,
//!    otherwise **Update**.
//! 2. Fewer replicas than desired: **ScaleOut**.
//! 3. More replicas than desired: **ScaleIn**.
//! 4. Otherwise **Running**.

use crate::crd::{ComponentPhase, ComponentSpec, ComponentStatus, WorkloadStatus};
use crate::workload::{config_hash, LiveWorkload};

/// What one pass knows about a component's live workload
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservedComponent {
    /// Workload status (all zero when the workload does not exist)
    pub status: WorkloadStatus,
    /// Whether the workload exists
    pub exists: bool,
    /// Version the settled replicas run
    pub running_version: Option<String>,
    /// Config hash stamped on the live pod template
    pub config_hash: Option<String>,
}

impl ObservedComponent {
    /// Combine a live observation with the previously recorded status.
    ///
    /// The running version is read from the pod template once the workload
    /// has settled; mid-rollout the template already carries the target
    /// version, so the previously recorded version is kept.
    pub fn new(live: Option<&LiveWorkload>, previous: &ComponentStatus) -> Self {
        match live {
            None => Self {
                running_version: previous.version.clone(),
                ..Default::default()
            },
            Some(live) => {
                let running_version = if live.is_settled() {
                    live.template_version
                        .clone()
                        .or_else(|| previous.version.clone())
                } else {
                    previous
                        .version
                        .clone()
                        .or_else(|| live.template_version.clone())
                };
                Self {
                    status: live.status.clone(),
                    exists: true,
                    running_version,
                    config_hash: live.config_hash.clone(),
                }
            }
        }
    }
}

/// Derive the phase of a component from its descriptor and observation
pub fn classify(desired: &ComponentSpec, observed: &ObservedComponent) -> ComponentPhase {
    let status = &observed.status;
    // Omitted replicas means no scaling requested
    let target = desired.replicas.unwrap_or(status.replicas);

    let version_changed = observed
        .running_version
        .as_deref()
        .is_some_and(|running| running != desired.version_or_default());

    let config_changed = observed.exists
        && desired
            .config
            .as_ref()
            .is_some_and(|config| observed.config_hash.as_deref() != Some(&config_hash(config)));

    let rolling = !status.revisions_match() && status.updated_replicas < target;

    if rolling || version_changed || config_changed {
        return if version_changed {
            ComponentPhase::Upgrade
        } else {
            ComponentPhase::Update
        };
    }

    if status.replicas < target {
        ComponentPhase::ScaleOut
    } else if status.replicas > target {
        ComponentPhase::ScaleIn
    } else {
        ComponentPhase::Running
    }
}
