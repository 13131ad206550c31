//! Integration tests for reconciliation passes
//!
//! Each story runs single passes of the reconciler against a real API server.
//! Images are never pulled to completion in kind, so pods stay unready and
//! the cluster is expected to stop at the metadata layer.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::api::{Api, PostParams};
use kube::ResourceExt;

use nebula_operator::config::ControllerConfig;
use nebula_operator::controller::{reconcile, Context};
use nebula_operator::crd::{Component, ConditionStatus, NebulaCluster};
use nebula_operator::workload::{
    headless_service_name, meta_endpoints_name, workload_name, META_ADDRS_KEY,
};
use nebula_operator::FINALIZER;

use super::helpers::{cleanup_cluster, ensure_test_cluster, sample_cluster, TEST_NAMESPACE};

/// Story: the first passes over a new cluster create the metadata layer and
/// hold storage and graph back until it is available
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_new_cluster_starts_with_metadata_layer() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<NebulaCluster> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "flow-create";
    cleanup_cluster(&client, name).await;

    api.create(&PostParams::default(), &sample_cluster(name))
        .await
        .expect("failed to create cluster");

    let ctx = Arc::new(
        Context::builder(client.clone())
            .config(ControllerConfig::default())
            .build(),
    );

    // Finalizer pass, then the first planning pass
    for _ in 0..2 {
        let current = api.get(name).await.expect("failed to get cluster");
        reconcile(Arc::new(current), ctx.clone())
            .await
            .expect("reconcile should succeed");
    }

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let metad = statefulsets
        .get_opt(&workload_name(name, Component::Metad))
        .await
        .expect("failed to read statefulset");
    assert!(metad.is_some(), "metadata workload should be created");
    for downstream in [Component::Storaged, Component::Graphd] {
        let sts = statefulsets
            .get_opt(&workload_name(name, downstream))
            .await
            .expect("failed to read statefulset");
        assert!(sts.is_none(), "{} must wait for metadata", downstream);
    }

    let services: Api<Service> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let headless = headless_service_name(name, Component::Metad);
    assert!(
        services.get_opt(&headless).await.unwrap().is_some(),
        "{} should be created",
        headless
    );
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let endpoints = config_maps
        .get(&meta_endpoints_name(name))
        .await
        .expect("metad endpoints should be published");
    assert!(endpoints
        .data
        .as_ref()
        .is_some_and(|d| d.contains_key(META_ADDRS_KEY)));

    let fetched = api.get(name).await.expect("failed to get cluster");
    assert!(fetched.finalizers().iter().any(|f| f == FINALIZER));
    let status = fetched.status.expect("status should be written");
    let ready = status.ready_condition().expect("Ready condition");
    assert_eq!(ready.status, ConditionStatus::False);
    assert_eq!(ready.reason, "metadata");
    assert_eq!(status.observed_generation, fetched.metadata.generation);

    cleanup_cluster(&client, name).await;
}

/// Story: an invalid cluster gets a readable InvalidSpec condition and no
/// workloads
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_invalid_cluster_is_reported() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let api: Api<NebulaCluster> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    let name = "flow-invalid";
    cleanup_cluster(&client, name).await;

    let mut cluster = sample_cluster(name);
    cluster.spec.storaged = None;
    api.create(&PostParams::default(), &cluster)
        .await
        .expect("failed to create cluster");

    // The first pass only adds the finalizer
    let ctx = Arc::new(Context::new(client.clone()));
    for _ in 0..2 {
        let current = api.get(name).await.expect("failed to get cluster");
        reconcile(Arc::new(current), ctx.clone())
            .await
            .expect("validation errors are not retried");
    }

    let fetched = api.get(name).await.expect("failed to get cluster");
    let ready = fetched
        .status
        .as_ref()
        .and_then(|s| s.ready_condition())
        .cloned()
        .expect("Ready condition");
    assert_eq!(ready.reason, "InvalidSpec");
    assert!(ready.message.contains("spec.storaged is required"));

    let statefulsets: Api<StatefulSet> = Api::namespaced(client.clone(), TEST_NAMESPACE);
    assert!(statefulsets
        .get_opt(&workload_name(name, Component::Metad))
        .await
        .unwrap()
        .is_none());

    cleanup_cluster(&client, name).await;
}
