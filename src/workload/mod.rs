//! Workload realization for Nebula components
//!
//! Each component of a NebulaCluster is realized as:
//! - StatefulSet: the replicated workload (always)
//! - Headless Service: stable network identity for replicas (always)
//! - Service: client-facing endpoint (if the descriptor declares one)
//! - ConfigMap: the daemon flagfile (if the descriptor carries a config map)
//!
//! The metadata layer also owns the cluster's metad endpoint list, a ConfigMap
//! every daemon mounts and reads at startup.
//!
//! The [`WorkloadCompiler`] produces these from the desired spec; the
//! [`observer`] module reads the live StatefulSet back.

pub mod observer;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetSpec, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec as KubeServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};
use sha2::{Digest, Sha256};

use crate::crd::{Component, ComponentSpec, NebulaCluster};
use crate::Error;

pub use observer::{image_tag, observe_workload, LiveWorkload};

// =============================================================================
// Labels and Annotations
// =============================================================================

/// Application label value shared by every managed object
pub const APP_NAME: &str = "nebula-graph";
/// Label carrying the owning cluster's name
pub const CLUSTER_LABEL: &str = "app.kubernetes.io/cluster";
/// Label carrying the component daemon name
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
/// Hash of the desired StatefulSet spec (replicas excluded)
pub const SPEC_HASH_ANNOTATION: &str = "nebula-graph.io/spec-hash";
/// Hash of the rendered component config, set on the pod template
pub const CONFIG_HASH_ANNOTATION: &str = "nebula-graph.io/config-hash";
/// Label the StatefulSet controller stamps on each pod
pub const REVISION_HASH_LABEL: &str = "controller-revision-hash";

const NAME_LABEL: &str = "app.kubernetes.io/name";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

const INSTALL_DIR: &str = "/usr/local/nebula";
const DATA_VOLUME: &str = "data";
const CONFIG_VOLUME: &str = "config";
const META_VOLUME: &str = "meta-endpoints";
/// Key of the endpoint list in the metad endpoints ConfigMap
pub const META_ADDRS_KEY: &str = "meta_server_addrs";

/// StatefulSet name for a component, e.g. `nc-graphd`
pub fn workload_name(cluster: &str, component: Component) -> String {
    format!("{}-{}", cluster, component.daemon())
}

/// Headless Service name for a component
pub fn headless_service_name(cluster: &str, component: Component) -> String {
    format!("{}-headless", workload_name(cluster, component))
}

/// Name of the ConfigMap listing the metad endpoints of a cluster
pub fn meta_endpoints_name(cluster: &str) -> String {
    format!("{}-endpoints", workload_name(cluster, Component::Metad))
}

/// Client Service name for a component
pub fn client_service_name(cluster: &str, component: Component) -> String {
    format!("{}-svc", workload_name(cluster, component))
}

/// Labels selecting every object that belongs to a cluster
pub fn cluster_labels(cluster: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), APP_NAME.to_string());
    labels.insert(CLUSTER_LABEL.to_string(), cluster.to_string());
    labels.insert(
        MANAGED_BY_LABEL.to_string(),
        crate::FIELD_MANAGER.to_string(),
    );
    labels
}

/// Labels selecting the pods of one component
pub fn selector_labels(cluster: &str, component: Component) -> BTreeMap<String, String> {
    let mut labels = cluster_labels(cluster);
    labels.insert(COMPONENT_LABEL.to_string(), component.daemon().to_string());
    labels
}

/// Label selector string for all objects of a cluster
pub fn cluster_selector(cluster: &str) -> String {
    format!(
        "{}={},{}={}",
        NAME_LABEL, APP_NAME, CLUSTER_LABEL, cluster
    )
}

/// Label selector string for the pods of one component
pub fn component_selector(cluster: &str, component: Component) -> String {
    format!(
        "{},{}={}",
        cluster_selector(cluster),
        COMPONENT_LABEL,
        component.daemon()
    )
}

/// sha256 of the config map, stable across key order
pub fn config_hash(config: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in config {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

/// Render a config map as a gflags flagfile
pub fn render_flagfile(config: &BTreeMap<String, String>) -> String {
    config
        .iter()
        .map(|(key, value)| format!("--{}={}\n", key, value))
        .collect()
}

/// Comma-separated metad endpoints every daemon is started with
pub fn meta_server_addrs(cluster: &str, namespace: &str, metad_replicas: i32) -> String {
    let headless = headless_service_name(cluster, Component::Metad);
    let name = workload_name(cluster, Component::Metad);
    (0..metad_replicas.max(1))
        .map(|i| {
            format!(
                "{}-{}.{}.{}.svc.cluster.local:{}",
                name,
                i,
                headless,
                namespace,
                Component::Metad.thrift_port()
            )
        })
        .collect::<Vec<_>>()
        .join(",")
}

// =============================================================================
// Compiled Resources
// =============================================================================

/// Desired platform objects for one component
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentResources {
    /// Component these resources realize
    pub component: Component,
    /// Flagfile ConfigMap (present when the descriptor has a config map)
    pub config_map: Option<ConfigMap>,
    /// Metad endpoint list (metadata layer only)
    pub endpoints: Option<ConfigMap>,
    /// Headless Service first, then the client Service if declared
    pub services: Vec<Service>,
    /// The replicated workload
    pub stateful_set: StatefulSet,
    /// Hash of the StatefulSet spec with replicas excluded
    pub spec_hash: String,
    /// Hash of the config map, if any
    pub config_hash: Option<String>,
}

impl ComponentResources {
    /// StatefulSet name
    pub fn name(&self) -> String {
        self.stateful_set.name_any()
    }

    /// Desired replica count, `None` when left to the platform default
    pub fn replicas(&self) -> Option<i32> {
        self.stateful_set.spec.as_ref().and_then(|s| s.replicas)
    }
}

// =============================================================================
// Workload Compiler
// =============================================================================

/// Compiler for generating Kubernetes resources from a NebulaCluster component
///
/// This compiler generates:
/// - ConfigMap: daemon flagfile (if config is set)
/// - ConfigMap: metad endpoint list (metadata layer only)
/// - Headless Service: replica DNS (always)
/// - Service: client endpoint (if service is set)
/// - StatefulSet: the workload (always)
pub struct WorkloadCompiler;

impl WorkloadCompiler {
    /// Compile one component of a cluster into its platform objects
    ///
    /// Fails with a validation error if the component is not declared.
    pub fn compile(
        cluster: &NebulaCluster,
        component: Component,
    ) -> Result<ComponentResources, Error> {
        let spec = cluster.spec.component(component).ok_or_else(|| {
            Error::validation(format!("spec.{} is not declared", component.daemon()))
        })?;
        let name = cluster.name_any();
        let namespace = cluster.namespace().unwrap_or_default();
        let metadata = |object_name: String| ObjectMeta {
            name: Some(object_name),
            namespace: Some(namespace.clone()),
            labels: Some(selector_labels(&name, component)),
            owner_references: cluster.controller_owner_ref(&()).map(|o| vec![o]),
            ..Default::default()
        };

        let config_hash = spec.config.as_ref().map(config_hash);
        let config_map = spec.config.as_ref().map(|config| ConfigMap {
            metadata: metadata(workload_name(&name, component)),
            data: Some(BTreeMap::from([(
                flagfile_name(component),
                render_flagfile(config),
            )])),
            ..Default::default()
        });

        let mut services = vec![Service {
            metadata: metadata(headless_service_name(&name, component)),
            spec: Some(Self::compile_headless_service(&name, component)),
            ..Default::default()
        }];
        if let Some(client) = Self::compile_client_service(&name, component, spec) {
            let mut meta = metadata(client_service_name(&name, component));
            if let Some(annotations) = spec.service.as_ref().map(|s| &s.annotations) {
                if !annotations.is_empty() {
                    meta.annotations = Some(annotations.clone());
                }
            }
            services.push(Service {
                metadata: meta,
                spec: Some(client),
                ..Default::default()
            });
        }

        // Never part of a pod template: metad replicas must not move any spec hash
        let endpoints = (component == Component::Metad).then(|| ConfigMap {
            metadata: metadata(meta_endpoints_name(&name)),
            data: Some(BTreeMap::from([(
                META_ADDRS_KEY.to_string(),
                meta_server_addrs(&name, &namespace, spec.replicas.unwrap_or(1)),
            )])),
            ..Default::default()
        });

        let mut sts_spec =
            Self::compile_stateful_set(cluster, component, spec, &namespace, config_hash.as_deref());
        let spec_hash = spec_hash(&sts_spec)?;
        sts_spec.replicas = spec.replicas;

        let mut sts_meta = metadata(workload_name(&name, component));
        sts_meta.annotations = Some(BTreeMap::from([(
            SPEC_HASH_ANNOTATION.to_string(),
            spec_hash.clone(),
        )]));

        Ok(ComponentResources {
            component,
            config_map,
            endpoints,
            services,
            stateful_set: StatefulSet {
                metadata: sts_meta,
                spec: Some(sts_spec),
                ..Default::default()
            },
            spec_hash,
            config_hash,
        })
    }

    /// StatefulSet spec with replicas left unset
    fn compile_stateful_set(
        cluster: &NebulaCluster,
        component: Component,
        spec: &ComponentSpec,
        namespace: &str,
        config_hash: Option<&str>,
    ) -> StatefulSetSpec {
        let name = cluster.name_any();
        let selector = selector_labels(&name, component);

        // Descriptor labels never override the selector
        let mut pod_labels = spec.labels.clone();
        pod_labels.extend(selector.clone());

        let mut pod_annotations = spec.annotations.clone();
        if let Some(hash) = config_hash {
            pod_annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), hash.to_string());
        }

        let mut volumes = vec![Volume {
            name: META_VOLUME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: meta_endpoints_name(&name),
                ..Default::default()
            }),
            ..Default::default()
        }];
        let mut volume_mounts = vec![VolumeMount {
            name: META_VOLUME.to_string(),
            mount_path: meta_endpoints_dir(),
            read_only: Some(true),
            ..Default::default()
        }];
        if spec.config.is_some() {
            volumes.push(Volume {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: workload_name(&name, component),
                    ..Default::default()
                }),
                ..Default::default()
            });
            volume_mounts.push(VolumeMount {
                name: CONFIG_VOLUME.to_string(),
                mount_path: format!("{}/etc/{}", INSTALL_DIR, flagfile_name(component)),
                sub_path: Some(flagfile_name(component)),
                ..Default::default()
            });
        }

        let volume_claim_templates = spec.storage_claim.as_ref().map(|claim| {
            volume_mounts.push(VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: format!("{}/data", INSTALL_DIR),
                ..Default::default()
            });
            vec![PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: Some(DATA_VOLUME.to_string()),
                    labels: Some(selector.clone()),
                    ..Default::default()
                },
                spec: Some(PersistentVolumeClaimSpec {
                    access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                    storage_class_name: claim.storage_class_name.clone(),
                    resources: Some(VolumeResourceRequirements {
                        requests: claim.resources.requests.clone(),
                        limits: claim.resources.limits.clone(),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }]
        });

        let container = Container {
            name: component.daemon().to_string(),
            image: Some(spec.image_ref(component)),
            image_pull_policy: Some(cluster.spec.image_pull_policy.clone()),
            command: Some(vec!["/bin/sh".to_string(), "-ecx".to_string()]),
            args: Some(vec![Self::compile_command(&name, component, spec, namespace)]),
            env: (!spec.env_vars.is_empty()).then(|| spec.env_vars.clone()),
            ports: Some(vec![
                ContainerPort {
                    name: Some("thrift".to_string()),
                    container_port: component.thrift_port(),
                    ..Default::default()
                },
                ContainerPort {
                    name: Some("http".to_string()),
                    container_port: component.http_port(),
                    ..Default::default()
                },
            ]),
            resources: spec.resources.clone(),
            volume_mounts: Some(volume_mounts),
            ..Default::default()
        };

        let update_policy = cluster.spec.update_policy_or_default().to_string();
        let rolling_update = (update_policy == "RollingUpdate").then(|| {
            RollingUpdateStatefulSetStrategy {
                partition: Some(0),
                ..Default::default()
            }
        });

        StatefulSetSpec {
            replicas: None,
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            service_name: headless_service_name(&name, component),
            pod_management_policy: Some("OrderedReady".to_string()),
            update_strategy: Some(StatefulSetUpdateStrategy {
                type_: Some(update_policy),
                rolling_update,
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    annotations: (!pod_annotations.is_empty()).then_some(pod_annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    scheduler_name: Some(cluster.spec.scheduler_name.clone()),
                    node_selector: (!cluster.spec.node_selector.is_empty())
                        .then(|| cluster.spec.node_selector.clone()),
                    image_pull_secrets: (!cluster.spec.image_pull_secrets.is_empty())
                        .then(|| cluster.spec.image_pull_secrets.clone()),
                    containers: vec![container],
                    volumes: Some(volumes),
                    ..Default::default()
                }),
            },
            volume_claim_templates,
            ..Default::default()
        }
    }

    fn compile_command(
        cluster: &str,
        component: Component,
        spec: &ComponentSpec,
        namespace: &str,
    ) -> String {
        let local = format!(
            "$(hostname).{}.{}.svc.cluster.local",
            headless_service_name(cluster, component),
            namespace
        );
        let mut command = format!(
            "exec {}/bin/nebula-{} --meta_server_addrs=$(cat {}/{}) --local_ip={} --ws_ip={} \
             --port={} --ws_http_port={} --daemonize=false",
            INSTALL_DIR,
            component.daemon(),
            meta_endpoints_dir(),
            META_ADDRS_KEY,
            local,
            local,
            component.thrift_port(),
            component.http_port(),
        );
        if spec.storage_claim.is_some() && component != Component::Graphd {
            command.push_str(&format!(" --data_path={}/data", INSTALL_DIR));
        }
        if spec.config.is_some() {
            command.push_str(&format!(
                " --flagfile={}/etc/{}",
                INSTALL_DIR,
                flagfile_name(component)
            ));
        }
        command
    }

    fn compile_headless_service(cluster: &str, component: Component) -> KubeServiceSpec {
        KubeServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector_labels(cluster, component)),
            ports: Some(service_ports(component)),
            ..Default::default()
        }
    }

    fn compile_client_service(
        cluster: &str,
        component: Component,
        spec: &ComponentSpec,
    ) -> Option<KubeServiceSpec> {
        let service = spec.service.as_ref()?;
        let selector = if service.selector.is_empty() {
            selector_labels(cluster, component)
        } else {
            service.selector.clone()
        };
        Some(KubeServiceSpec {
            type_: service.type_.clone(),
            cluster_ip: service.cluster_ip.clone(),
            publish_not_ready_addresses: Some(service.publish_not_ready_addresses),
            load_balancer_ip: service.load_balancer_ip.clone(),
            external_traffic_policy: service.external_traffic_policy.clone(),
            selector: Some(selector),
            ports: Some(service_ports(component)),
            ..Default::default()
        })
    }
}

fn meta_endpoints_dir() -> String {
    format!("{}/etc/meta", INSTALL_DIR)
}

fn flagfile_name(component: Component) -> String {
    format!("nebula-{}.conf", component.daemon())
}

fn service_ports(component: Component) -> Vec<ServicePort> {
    vec![
        ServicePort {
            name: Some("thrift".to_string()),
            port: component.thrift_port(),
            target_port: Some(IntOrString::Int(component.thrift_port())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
        ServicePort {
            name: Some("http".to_string()),
            port: component.http_port(),
            target_port: Some(IntOrString::Int(component.http_port())),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        },
    ]
}

fn spec_hash(spec: &StatefulSetSpec) -> Result<String, Error> {
    let bytes = serde_json::to_vec(spec).map_err(|e| Error::serialization(e.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

// =============================================================================
// Tests
// =============================================================================
