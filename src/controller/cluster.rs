//! NebulaCluster controller implementation
//!
//! This module implements the reconciliation pass for NebulaCluster
//! resources: observe every component's workload, plan the next step with
//! [`super::plan`], execute it in dependency order and persist the status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::plan::{check_ordering, plan, Action as PlanAction, Change, ClusterObservation};
use crate::condition;
use crate::config::ControllerConfig;
use crate::crd::{
    Component, ConditionStatus, NebulaCluster, NebulaClusterStatus, CONDITION_READY,
};
use crate::events::{
    actions, reasons, BoundedEventPublisher, EventPublisher, KubeEventPublisher,
};
use crate::retry::with_timeout;
use crate::workload::{
    cluster_selector, component_selector, observe_workload, workload_name, ComponentResources,
    LiveWorkload,
};
use crate::{Error, FIELD_MANAGER, FINALIZER};

/// Trait abstracting Kubernetes client operations for NebulaCluster
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Read a component's StatefulSet and its pods
    ///
    /// Returns `None` if the StatefulSet does not exist.
    async fn get_workload(
        &self,
        namespace: &str,
        cluster: &str,
        component: Component,
    ) -> Result<Option<LiveWorkload>, Error>;

    /// Server-side apply a component's ConfigMaps, Services and StatefulSet
    async fn apply_resources(
        &self,
        namespace: &str,
        resources: &ComponentResources,
    ) -> Result<(), Error>;

    /// Patch the status of a NebulaCluster
    ///
    /// # Arguments
    ///
    /// * `resource_version` - Version the status was computed from; the
    ///   write fails with [`Error::Conflict`] if the object changed since
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &NebulaClusterStatus,
    ) -> Result<(), Error>;

    /// Whether the cluster is gone or has a deletion timestamp
    async fn is_deleting(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    /// Add the volume reclaim finalizer
    async fn add_finalizer(&self, cluster: &NebulaCluster) -> Result<(), Error>;

    /// Remove the volume reclaim finalizer
    async fn remove_finalizer(&self, cluster: &NebulaCluster) -> Result<(), Error>;

    /// Delete every PersistentVolumeClaim of a cluster, returning the count
    async fn delete_volume_claims(&self, namespace: &str, cluster: &str) -> Result<usize, Error>;
}

/// Real Kubernetes client implementation
///
/// Every API call is bounded by the configured observation timeout.
pub struct KubeClientImpl {
    client: Client,
    timeout: std::time::Duration,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client, timeout: std::time::Duration) -> Self {
        Self { client, timeout }
    }

    async fn apply<K>(&self, api: &Api<K>, obj: &K, component: Component) -> Result<(), Error>
    where
        K: Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        let name = obj.meta().name.clone().unwrap_or_default();
        let params = PatchParams::apply(FIELD_MANAGER).force();
        with_timeout(self.timeout, "apply_resources", async {
            api.patch(&name, &params, &Patch::Apply(obj))
                .await
                .map_err(|e| Error::apply(component.as_str(), format!("{}: {}", name, e)))
        })
        .await?;
        Ok(())
    }

    async fn patch_finalizers(
        &self,
        cluster: &NebulaCluster,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let namespace = cluster.namespace().unwrap_or_default();
        let api: Api<NebulaCluster> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": cluster.resource_version(),
            }
        });
        with_timeout(self.timeout, "patch_finalizers", async {
            api.patch(
                &cluster.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(write_error)
        })
        .await?;
        Ok(())
    }
}

/// Map a write failure, turning 409 into [`Error::Conflict`]
fn write_error(e: kube::Error) -> Error {
    match e {
        kube::Error::Api(resp) if resp.code == 409 => Error::conflict(resp.message),
        other => Error::Kube(other),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_workload(
        &self,
        namespace: &str,
        cluster: &str,
        component: Component,
    ) -> Result<Option<LiveWorkload>, Error> {
        let observation_error = |e: kube::Error| Error::observation(component.as_str(), e.to_string());

        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        let name = workload_name(cluster, component);
        let sts = with_timeout(self.timeout, "get_workload", async {
            statefulsets.get_opt(&name).await.map_err(observation_error)
        })
        .await?;

        let Some(sts) = sts else {
            return Ok(None);
        };

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&component_selector(cluster, component));
        let pods = with_timeout(self.timeout, "list_pods", async {
            pods.list(&params).await.map_err(observation_error)
        })
        .await?;

        Ok(Some(observe_workload(&sts, &pods.items)))
    }

    async fn apply_resources(
        &self,
        namespace: &str,
        resources: &ComponentResources,
    ) -> Result<(), Error> {
        let component = resources.component;

        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        for config_map in resources.endpoints.iter().chain(&resources.config_map) {
            self.apply(&config_maps, config_map, component).await?;
        }

        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        for service in &resources.services {
            self.apply(&services, service, component).await?;
        }

        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        self.apply(&statefulsets, &resources.stateful_set, component)
            .await
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        resource_version: Option<String>,
        status: &NebulaClusterStatus,
    ) -> Result<(), Error> {
        let api: Api<NebulaCluster> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status
        });

        with_timeout(self.timeout, "patch_status", async {
            api.patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await
            .map_err(write_error)
        })
        .await?;

        Ok(())
    }

    async fn is_deleting(&self, namespace: &str, name: &str) -> Result<bool, Error> {
        let api: Api<NebulaCluster> = Api::namespaced(self.client.clone(), namespace);
        let current = with_timeout(self.timeout, "get_cluster", async {
            api.get_opt(name).await.map_err(Error::from)
        })
        .await?;
        Ok(current.is_none_or(|c| c.metadata.deletion_timestamp.is_some()))
    }

    async fn add_finalizer(&self, cluster: &NebulaCluster) -> Result<(), Error> {
        let mut finalizers = cluster.finalizers().to_vec();
        if finalizers.iter().any(|f| f == FINALIZER) {
            return Ok(());
        }
        finalizers.push(FINALIZER.to_string());
        self.patch_finalizers(cluster, finalizers).await
    }

    async fn remove_finalizer(&self, cluster: &NebulaCluster) -> Result<(), Error> {
        let finalizers: Vec<String> = cluster
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect();
        self.patch_finalizers(cluster, finalizers).await
    }

    async fn delete_volume_claims(&self, namespace: &str, cluster: &str) -> Result<usize, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&cluster_selector(cluster));
        let claims = with_timeout(self.timeout, "list_volume_claims", async {
            api.list(&params).await.map_err(Error::from)
        })
        .await?;

        let mut deleted = 0;
        for claim in claims.items {
            let name = claim.name_any();
            let result = with_timeout(self.timeout, "delete_volume_claim", async {
                api.delete(&name, &DeleteParams::default())
                    .await
                    .map_err(Error::from)
            })
            .await;
            match result {
                Ok(_) => deleted += 1,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }
}

/// Controller context shared by all reconciliation passes
///
/// # Example
///
/// ```ignore
/// let ctx = Context::builder(client)
///     .config(ControllerConfig::default())
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Event publisher for `kubectl describe` visibility
    pub events: Arc<dyn EventPublisher>,
    /// Controller settings
    pub config: ControllerConfig,
    /// Consecutive failed passes per object, drives backoff
    failures: DashMap<String, u32>,
    /// Consecutive observation failures per object
    observation_failures: DashMap<String, u32>,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a new controller context with the given Kubernetes client
    ///
    /// This is a convenience method equivalent to `Context::builder(client).build()`.
    pub fn new(client: Client) -> Self {
        Self::builder(client).build()
    }

    /// Create a context for testing with custom mock clients
    ///
    /// This method is primarily for unit tests where a real Kubernetes
    /// client is not available. For production code, use [`Context::builder`].
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        events: Arc<dyn EventPublisher>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            kube,
            events,
            config,
            failures: DashMap::new(),
            observation_failures: DashMap::new(),
        }
    }

    /// Record a failed pass, returning the consecutive failure count
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut entry = self.failures.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Consecutive failed passes for an object
    pub fn failure_count(&self, key: &str) -> u32 {
        self.failures.get(key).map(|v| *v).unwrap_or(0)
    }

    fn record_observation_failure(&self, key: &str) -> u32 {
        let mut entry = self.observation_failures.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    fn reset(&self, key: &str) {
        self.failures.remove(key);
        self.observation_failures.remove(key);
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    config: ControllerConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            events: None,
            config: ControllerConfig::default(),
        }
    }

    /// Set the controller configuration
    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the event publisher
    pub fn event_publisher(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let timeout = self.config.observation_timeout();
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone(), timeout))),
            events: self.events.unwrap_or_else(|| {
                Arc::new(BoundedEventPublisher::new(
                    KubeEventPublisher::new(self.client.clone(), FIELD_MANAGER),
                    timeout,
                ))
            }),
            config: self.config,
            failures: DashMap::new(),
            observation_failures: DashMap::new(),
        }
    }
}

/// Identity of a cluster object for per-object bookkeeping
fn object_key(cluster: &NebulaCluster) -> String {
    format!(
        "{}/{}",
        cluster.namespace().unwrap_or_default(),
        cluster.name_any()
    )
}

fn is_ready(status: Option<&NebulaClusterStatus>) -> bool {
    status
        .and_then(|s| s.ready_condition())
        .is_some_and(|c| c.status == ConditionStatus::True)
}

/// Reconcile a NebulaCluster resource
///
/// One level-triggered pass: observe, plan, apply in dependency order and
/// persist status. The kube runtime never runs two passes for the same
/// object concurrently.
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<NebulaCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    let key = object_key(&cluster);
    info!("reconciling cluster");

    if cluster.metadata.deletion_timestamp.is_some() {
        return cleanup(&cluster, &ctx).await;
    }
    if !cluster.finalizers().iter().any(|f| f == FINALIZER) {
        debug!("adding finalizer");
        ctx.kube.add_finalizer(&cluster).await?;
        // The write bumped the resourceVersion this copy carries
        return Ok(Action::requeue(std::time::Duration::ZERO));
    }

    let previous = cluster.status.clone().unwrap_or_default();

    // Validate the cluster spec
    if let Err(e) = cluster.spec.validate() {
        warn!(error = %e, "cluster validation failed");
        publish(&cluster, &ctx, EventType::Warning, reasons::INVALID_SPEC, actions::RECONCILE, e.to_string()).await;
        let mut status = previous.clone();
        status.set_condition(condition::invalid_spec(
            e.to_string(),
            previous.ready_condition(),
            Utc::now(),
        ));
        update_status(&cluster, &ctx, status).await?;
        ctx.reset(&key);
        // Don't requeue for validation errors - they require spec changes
        return Ok(Action::await_change());
    }

    let observation = match observe(&cluster, &ctx).await {
        Ok(observation) => observation,
        Err(e) => {
            handle_observation_failure(&cluster, &ctx, &e).await;
            return Err(e);
        }
    };

    let mut plan = plan(&cluster, &observation, Utc::now())?;
    if let Err(e) = check_ordering(&plan) {
        error!(error = %e, "refusing to execute out-of-order plan");
        return Err(e);
    }

    let mut apply_failed = false;
    for action in &plan.actions {
        match action {
            PlanAction::Wait {
                component,
                blocked_on,
            } => {
                info!(%component, %blocked_on, "change pending, waiting for upstream component");
            }
            PlanAction::Apply {
                component,
                change,
                resources,
            } => {
                if ctx.kube.is_deleting(&namespace, &name).await? {
                    info!("cluster is being deleted, stopping pass");
                    return Ok(Action::await_change());
                }
                info!(%component, %change, "applying component resources");
                match ctx.kube.apply_resources(&namespace, resources).await {
                    Ok(()) => {
                        let (reason, action) = change_event(change);
                        publish(&cluster, &ctx, EventType::Normal, reason, action, format!("{}: {}", component, change)).await;
                    }
                    Err(e) => {
                        warn!(%component, error = %e, "apply failed");
                        apply_failed = true;
                        let note = format!("apply failed for {}: {}", component, e);
                        publish(&cluster, &ctx, EventType::Warning, reasons::APPLY_FAILED, action_for(change), note.clone()).await;
                        append_ready_message(&mut plan.status, &note);
                    }
                }
            }
        }
    }

    if ctx.kube.is_deleting(&namespace, &name).await? {
        info!("cluster is being deleted, skipping status update");
        return Ok(Action::await_change());
    }

    let was_ready = is_ready(cluster.status.as_ref());
    let now_ready = is_ready(Some(&plan.status));
    update_status(&cluster, &ctx, plan.status).await?;
    ctx.reset(&key);

    if now_ready && !was_ready {
        info!("cluster is ready");
        publish(&cluster, &ctx, EventType::Normal, reasons::CLUSTER_READY, actions::RECONCILE, "all components are running".to_string()).await;
    }

    let requeue = if apply_failed {
        ctx.config.apply_retry_requeue()
    } else if now_ready {
        ctx.config.steady_requeue()
    } else {
        ctx.config.progress_requeue()
    };
    Ok(Action::requeue(requeue))
}

/// Read every declared component's workload
async fn observe(cluster: &NebulaCluster, ctx: &Context) -> Result<ClusterObservation, Error> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let mut observation = ClusterObservation::new();
    for (component, _) in cluster.spec.components() {
        let live = ctx.kube.get_workload(&namespace, &name, component).await?;
        match live {
            Some(ref w) => debug!(
                %component,
                replicas = w.status.replicas,
                ready = w.status.ready_replicas,
                updated = w.status.updated_replicas,
                current_revision = %w.status.current_revision,
                update_revision = %w.status.update_revision,
                "observed workload"
            ),
            None => debug!(%component, "workload does not exist"),
        }
        observation.insert(component, live);
    }
    Ok(observation)
}

/// Record a failed observation.
///
/// Status is left untouched except before the first successful observation
/// (Ready=Unknown) and once the failure ceiling is reached
/// (Ready=False, ObservationFailed). Write failures here are only logged;
/// the observation error is what the pass returns.
async fn handle_observation_failure(cluster: &NebulaCluster, ctx: &Context, e: &Error) {
    let key = object_key(cluster);
    let failures = ctx.record_observation_failure(&key);
    warn!(error = %e, failures, "workload observation failed");

    let previous = cluster.status.clone().unwrap_or_default();
    let ready = previous.ready_condition();
    let now = Utc::now();

    let condition = if failures >= ctx.config.max_observation_failures {
        if failures == ctx.config.max_observation_failures {
            publish(cluster, ctx, EventType::Warning, reasons::OBSERVATION_FAILED, actions::RECONCILE, e.to_string()).await;
        }
        condition::observation_failed(
            format!("{} consecutive observation failures: {}", failures, e),
            ready,
            now,
        )
    } else if ready.is_none() {
        condition::unknown(
            format!("waiting for first successful observation: {}", e),
            None,
            now,
        )
    } else {
        return;
    };

    let mut status = previous.clone();
    status.set_condition(condition);
    if let Err(write_err) = update_status(cluster, ctx, status).await {
        warn!(error = %write_err, "failed to record observation failure");
    }
}

/// Finalizer cleanup for a cluster being deleted
async fn cleanup(cluster: &NebulaCluster, ctx: &Context) -> Result<Action, Error> {
    let key = object_key(cluster);
    if !cluster.finalizers().iter().any(|f| f == FINALIZER) {
        ctx.reset(&key);
        return Ok(Action::await_change());
    }

    if cluster.spec.reclaims_volumes() {
        let namespace = cluster.namespace().unwrap_or_default();
        let count = ctx
            .kube
            .delete_volume_claims(&namespace, &cluster.name_any())
            .await?;
        info!(count, "reclaimed persistent volume claims");
        publish(cluster, ctx, EventType::Normal, reasons::VOLUMES_RECLAIMED, actions::DELETE, format!("deleted {} persistent volume claims", count)).await;
    }

    ctx.kube.remove_finalizer(cluster).await?;
    ctx.reset(&key);
    info!("finalizer removed");
    Ok(Action::await_change())
}

/// Persist status unless it matches the current status apart from
/// timestamps
///
/// Status writes are watch events for this controller, so an unconditional
/// write would schedule another pass every time. The cost is that a
/// condition's `lastUpdateTime` records the last pass that changed the
/// status, not the latest pass.
async fn update_status(
    cluster: &NebulaCluster,
    ctx: &Context,
    status: NebulaClusterStatus,
) -> Result<(), Error> {
    if cluster
        .status
        .as_ref()
        .is_some_and(|current| current.same_state(&status))
    {
        debug!("status unchanged, skipping update");
        return Ok(());
    }

    ctx.kube
        .patch_status(
            &cluster.namespace().unwrap_or_default(),
            &cluster.name_any(),
            cluster.resource_version(),
            &status,
        )
        .await
}

fn append_ready_message(status: &mut NebulaClusterStatus, note: &str) {
    if let Some(ready) = status
        .conditions
        .iter_mut()
        .find(|c| c.type_ == CONDITION_READY)
    {
        if ready.message.is_empty() {
            ready.message = note.to_string();
        } else {
            ready.message = format!("{}; {}", ready.message, note);
        }
    }
}

fn change_event(change: &Change) -> (&'static str, &'static str) {
    match change {
        Change::Create => (reasons::COMPONENT_CREATED, actions::CREATE),
        Change::Scale { .. } => (reasons::COMPONENT_SCALING, actions::SCALE),
        Change::Upgrade { .. } => (reasons::COMPONENT_UPGRADING, actions::UPGRADE),
        Change::Update => (reasons::COMPONENT_UPDATING, actions::UPDATE),
    }
}

fn action_for(change: &Change) -> &'static str {
    change_event(change).1
}

async fn publish(
    cluster: &NebulaCluster,
    ctx: &Context,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    ctx.events
        .publish(&cluster.object_ref(&()), type_, reason, action, Some(note))
        .await;
}

/// Error policy for the controller
///
/// Requeues with exponential backoff per object: 1s, 2s, 4s, ... capped at
/// the configured maximum. A successful pass resets the count.
pub fn error_policy(cluster: Arc<NebulaCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let attempt = ctx.record_failure(&object_key(&cluster));
    let delay = ctx.config.backoff().delay_for_attempt(attempt);

    error!(
        ?error,
        cluster = %cluster.name_any(),
        attempt,
        retry_in = ?delay,
        "reconciliation failed"
    );

    Action::requeue(delay)
}
