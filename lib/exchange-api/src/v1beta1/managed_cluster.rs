use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ManagedCluster is the control plane's view of a registered child cluster.
///
/// The exchange only reads it: the API server address the agent reported and
/// whether the cluster can be reached only through the agent's tunnel.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clusters.clusternet.io",
    version = "v1beta1",
    kind = "ManagedCluster",
    plural = "managedclusters",
    namespaced,
    derive = "Default",
    status = "ManagedClusterStatus",
    printcolumn = r#"{"name":"Cluster ID","type":"string","jsonPath":".spec.clusterId"}"#,
    printcolumn = r#"{"name":"Use Socket","type":"boolean","jsonPath":".status.useSocket"}"#,
)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterSpec {
    /// Unique identifier of the cluster, mirrored in the cluster-id label
    pub cluster_id: String,

    /// EdgeCluster or StandardCluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,

    /// Push, Pull or Dual
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_mode: Option<String>,
}

/// Status reported by the cluster's agent
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedClusterStatus {
    /// Base URL of the child cluster's API server, empty until reported
    #[serde(default, rename = "apiserverURL")]
    pub api_server_url: String,

    /// The cluster is only reachable through its agent's tunnel session
    #[serde(default)]
    pub use_socket: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub k8s_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    #[serde(default)]
    pub healthz: bool,

    #[serde(default)]
    pub readyz: bool,
}
