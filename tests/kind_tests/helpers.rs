//! Shared setup for kind-based integration tests

use std::process::Command;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt};
use tokio::sync::OnceCell;

use nebula_operator::crd::{NebulaCluster, NebulaClusterSpec};
use nebula_operator::FIELD_MANAGER;

/// Name of the kind cluster used by the integration tests
pub const KIND_CLUSTER: &str = "nebula-integration-test";

/// Namespace every test object is created in
pub const TEST_NAMESPACE: &str = "nebula-it";

static SETUP: OnceCell<()> = OnceCell::const_new();

fn kind_cluster_exists() -> Result<bool, String> {
    let output = Command::new("kind")
        .args(["get", "clusters"])
        .output()
        .map_err(|e| format!("failed to run kind: {}", e))?;
    let clusters = String::from_utf8_lossy(&output.stdout);
    Ok(clusters.lines().any(|l| l.trim() == KIND_CLUSTER))
}

fn create_kind_cluster() -> Result<(), String> {
    let status = Command::new("kind")
        .args(["create", "cluster", "--name", KIND_CLUSTER, "--wait", "120s"])
        .status()
        .map_err(|e| format!("failed to run kind: {}", e))?;
    if !status.success() {
        return Err(format!("kind create cluster exited with {}", status));
    }
    Ok(())
}

async fn install_crd(client: &Client) -> Result<(), String> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        NebulaCluster::crd_name(),
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&NebulaCluster::crd()),
    )
    .await
    .map_err(|e| format!("failed to install CRD: {}", e))?;

    // Give the API server a moment to serve the new resource
    for _ in 0..30 {
        let api: Api<NebulaCluster> = Api::namespaced(client.clone(), TEST_NAMESPACE);
        if api.list(&Default::default()).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err("NebulaCluster CRD was not served in time".to_string())
}

async fn ensure_namespace(client: &Client) -> Result<(), String> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: kube::api::ObjectMeta {
            name: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &ns).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(format!("failed to create namespace: {}", e)),
    }
}

/// Ensure a kind cluster with the NebulaCluster CRD is available and return
/// a client for it
pub async fn ensure_test_cluster() -> Result<Client, String> {
    if !kind_cluster_exists()? {
        create_kind_cluster()?;
    }
    let client = Client::try_default()
        .await
        .map_err(|e| format!("failed to create client: {}", e))?;

    SETUP
        .get_or_try_init(|| async {
            ensure_namespace(&client).await?;
            install_crd(&client).await
        })
        .await?;

    Ok(client)
}

/// A small three-component cluster
pub fn sample_cluster(name: &str) -> NebulaCluster {
    let spec: NebulaClusterSpec = serde_json::from_value(serde_json::json!({
        "metad": {"replicas": 1, "version": "v3.6.0"},
        "storaged": {"replicas": 1, "version": "v3.6.0"},
        "graphd": {"replicas": 1, "version": "v3.6.0"},
    }))
    .expect("valid spec");
    let mut cluster = NebulaCluster::new(name, spec);
    cluster.metadata.namespace = Some(TEST_NAMESPACE.to_string());
    cluster
}

/// Delete a cluster and drop its finalizer so the name can be reused
pub async fn cleanup_cluster(client: &Client, name: &str) {
    let api: Api<NebulaCluster> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let _ = api
        .patch(
            name,
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({"metadata": {"finalizers": null}})),
        )
        .await;
    let _ = api.delete(name, &DeleteParams::default()).await;
    for _ in 0..20 {
        if matches!(api.get_opt(name).await, Ok(None)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
