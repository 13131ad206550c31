//! Integration tests for CRD operations
//!
//! These tests tell the story of how users interact with NebulaCluster
//! resources through the Kubernetes API.

use kube::api::{Api, Patch, PatchParams, PostParams};

use nebula_operator::crd::{
    Component, ComponentPhase, NebulaCluster, NebulaClusterStatus, DEFAULT_PULL_POLICY,
    DEFAULT_SCHEDULER,
};

use super::helpers::{cleanup_cluster, ensure_test_cluster, sample_cluster, TEST_NAMESPACE};

/// Story: a database operator declares a cluster and reads it back with
/// defaults filled in
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_declares_cluster() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<NebulaCluster> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-create";
    cleanup_cluster(&client, name).await;

    api.create(&PostParams::default(), &sample_cluster(name))
        .await
        .expect("failed to create cluster");

    let fetched = api.get(name).await.expect("failed to get cluster");
    assert_eq!(fetched.spec.scheduler_name, DEFAULT_SCHEDULER);
    assert_eq!(fetched.spec.image_pull_policy, DEFAULT_PULL_POLICY);
    let components: Vec<Component> = fetched.spec.components().map(|(c, _)| c).collect();
    assert_eq!(components, Component::ALL.to_vec());
    assert!(fetched.spec.validate().is_ok());

    cleanup_cluster(&client, name).await;
}

/// Story: status is written through the status subresource and survives a
/// spec update
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_status_survives_spec_update() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<NebulaCluster> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "crd-status";
    cleanup_cluster(&client, name).await;

    api.create(&PostParams::default(), &sample_cluster(name))
        .await
        .expect("failed to create cluster");

    let mut status = NebulaClusterStatus::default();
    status.component_mut(Component::Metad).phase = Some(ComponentPhase::Running);
    api.patch_status(
        name,
        &PatchParams::default(),
        &Patch::Merge(serde_json::json!({ "status": status })),
    )
    .await
    .expect("failed to patch status");

    api.patch(
        name,
        &PatchParams::default(),
        &Patch::Merge(serde_json::json!({"spec": {"graphd": {"replicas": 3}}})),
    )
    .await
    .expect("failed to patch spec");

    let fetched = api.get(name).await.expect("failed to get cluster");
    assert_eq!(
        fetched.spec.graphd.as_ref().and_then(|g| g.replicas),
        Some(3)
    );
    let status = fetched.status.expect("status should be kept");
    assert_eq!(
        status.component(Component::Metad).phase,
        Some(ComponentPhase::Running)
    );

    cleanup_cluster(&client, name).await;
}
