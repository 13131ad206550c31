//! Component identity and the per-component descriptor (desired configuration)

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default version tag when a descriptor omits one
pub const DEFAULT_VERSION: &str = "latest";

/// One of the three cooperating services of a Nebula cluster.
///
/// The declaration order is the dependency order: the storage layer needs
/// the metadata layer for partition and schema metadata, and the query layer
/// needs the storage layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    /// Metadata layer (metad)
    Metad,
    /// Storage layer (storaged)
    Storaged,
    /// Query/coordination layer (graphd)
    Graphd,
}

impl Component {
    /// All components in dependency order
    pub const ALL: [Component; 3] = [Component::Metad, Component::Storaged, Component::Graphd];

    /// Layer name used in condition reasons and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metad => "metadata",
            Self::Storaged => "storage",
            Self::Graphd => "graph",
        }
    }

    /// Daemon name used for workload names, labels and field names
    pub fn daemon(&self) -> &'static str {
        match self {
            Self::Metad => "metad",
            Self::Storaged => "storaged",
            Self::Graphd => "graphd",
        }
    }

    /// Components this one depends on, nearest first
    pub fn upstream(&self) -> &'static [Component] {
        match self {
            Self::Metad => &[],
            Self::Storaged => &[Component::Metad],
            Self::Graphd => &[Component::Storaged, Component::Metad],
        }
    }

    /// Default container image repository
    pub fn default_image(&self) -> &'static str {
        match self {
            Self::Metad => "vesoft/nebula-metad",
            Self::Storaged => "vesoft/nebula-storaged",
            Self::Graphd => "vesoft/nebula-graphd",
        }
    }

    /// Thrift port serving clients and peers
    pub fn thrift_port(&self) -> i32 {
        match self {
            Self::Metad => 9559,
            Self::Storaged => 9779,
            Self::Graphd => 9669,
        }
    }

    /// HTTP port serving status and flags
    pub fn http_port(&self) -> i32 {
        match self {
            Self::Metad => 19559,
            Self::Storaged => 19779,
            Self::Graphd => 19669,
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired configuration for one component (the component descriptor)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Replica count; omitted means the platform default and no scaling requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0))]
    pub replicas: Option<i32>,

    /// Container resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    /// Container environment variables
    #[serde(default, rename = "env", skip_serializing_if = "Vec::is_empty")]
    pub env_vars: Vec<EnvVar>,

    /// Container image repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Pod annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Pod labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Runtime flags handed to the daemon as-is
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, String>>,

    /// Client-facing Service for the component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,

    /// Persistent data volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_claim: Option<StorageClaim>,
}

impl ComponentSpec {
    /// Image repository, falling back to the component default
    pub fn image_or_default(&self, component: Component) -> &str {
        self.image
            .as_deref()
            .filter(|i| !i.is_empty())
            .unwrap_or(component.default_image())
    }

    /// Version tag, falling back to [`DEFAULT_VERSION`]
    pub fn version_or_default(&self) -> &str {
        self.version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_VERSION)
    }

    /// Fully qualified image reference
    pub fn image_ref(&self, component: Component) -> String {
        format!(
            "{}:{}",
            self.image_or_default(component),
            self.version_or_default()
        )
    }

    /// Validate the descriptor; `field` is the spec path used in messages
    pub fn validate(&self, field: &str) -> Result<(), crate::Error> {
        if let Some(replicas) = self.replicas {
            if replicas < 0 {
                return Err(crate::Error::validation(format!(
                    "{field}.replicas must be non-negative, got {replicas}"
                )));
            }
        }

        if let Some(ref claim) = self.storage_claim {
            if claim.storage_request().is_none() {
                return Err(crate::Error::validation(format!(
                    "{field}.storageClaim.resources.requests.storage is required"
                )));
            }
        }

        if let Some(ref service) = self.service {
            if service.load_balancer_ip.is_some()
                && service.type_.as_deref() != Some("LoadBalancer")
            {
                return Err(crate::Error::validation(format!(
                    "{field}.service.loadBalancerIP requires service type LoadBalancer"
                )));
            }
        }

        Ok(())
    }
}

/// Kubernetes Service settings for a component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Service type (ClusterIP, NodePort, LoadBalancer)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    /// Service annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Selector override; defaults to the component's pod labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// Fixed cluster IP
    #[serde(default, rename = "clusterIP", skip_serializing_if = "Option::is_none")]
    pub cluster_ip: Option<String>,

    /// Publish endpoints of pods that are not ready
    #[serde(default)]
    pub publish_not_ready_addresses: bool,

    /// Load balancer IP (query layer only)
    #[serde(
        default,
        rename = "loadBalancerIP",
        skip_serializing_if = "Option::is_none"
    )]
    pub load_balancer_ip: Option<String>,

    /// External traffic policy (query layer only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_traffic_policy: Option<String>,
}

/// Persistent storage request for a component
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageClaim {
    /// Minimum resources the volume should have (`requests.storage`)
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// StorageClass to provision from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

impl StorageClaim {
    /// Requested capacity, if any
    pub fn storage_request(&self) -> Option<&str> {
        self.resources
            .requests
            .as_ref()
            .and_then(|r| r.get("storage"))
            .map(|q| q.0.as_str())
            .filter(|q| !q.trim().is_empty())
    }
}
