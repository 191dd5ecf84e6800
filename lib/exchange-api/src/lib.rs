//! API types for the cluster exchange
//!
//! This library defines:
//! - ManagedCluster: the registry record of a child cluster (clusters.clusternet.io/v1beta1)
//! - Socket routes: the proxies.clusternet.io/v1alpha1 socket subresource paths

pub mod v1alpha1;
pub mod v1beta1;

pub use v1alpha1::{parse_socket_path, SocketRoute, SOCKETS_PATH_PREFIX};
pub use v1beta1::{ManagedCluster, ManagedClusterSpec, ManagedClusterStatus, CLUSTER_ID_LABEL};
