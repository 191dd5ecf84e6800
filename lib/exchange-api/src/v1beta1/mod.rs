/// API version v1beta1 for cluster registry resources

pub mod managed_cluster;

pub use managed_cluster::{ManagedCluster, ManagedClusterSpec, ManagedClusterStatus};

/// API group for cluster registry resources
pub const API_GROUP: &str = "clusters.clusternet.io";
/// API version for cluster registry resources
pub const API_VERSION: &str = "v1beta1";

/// Label carrying the cluster identifier on every ManagedCluster
pub const CLUSTER_ID_LABEL: &str = "clusters.clusternet.io/cluster-id";
