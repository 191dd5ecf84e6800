//! Registry view of a child cluster

use exchange_api::{ManagedCluster, CLUSTER_ID_LABEL};
use serde::{Deserialize, Serialize};

/// What the exchange needs to know about a cluster. Never mutated by the exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRecord {
    pub cluster_id: String,
    /// Self-reported API server base URL, empty until the agent reports it
    #[serde(default)]
    pub api_server_url: String,
    /// Reachable only through the agent's tunnel session
    #[serde(default)]
    pub use_socket: bool,
}

impl ClusterRecord {
    pub fn new(
        cluster_id: impl Into<String>,
        api_server_url: impl Into<String>,
        use_socket: bool,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            api_server_url: api_server_url.into(),
            use_socket,
        }
    }

    /// Build a record from a ManagedCluster, keyed by its cluster-id label.
    ///
    /// Objects without the label are not addressable and yield `None`.
    pub fn from_managed_cluster(cluster: &ManagedCluster) -> Option<Self> {
        let cluster_id = cluster.metadata.labels.as_ref()?.get(CLUSTER_ID_LABEL)?;
        let status = cluster.status.clone().unwrap_or_default();

        Some(Self {
            cluster_id: cluster_id.clone(),
            api_server_url: status.api_server_url,
            use_socket: status.use_socket,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchange_api::{ManagedClusterSpec, ManagedClusterStatus};
    use std::collections::BTreeMap;

    fn managed_cluster(
        label: Option<&str>,
        status: Option<ManagedClusterStatus>,
    ) -> ManagedCluster {
        let mut cluster = ManagedCluster::new(
            "mc-1",
            ManagedClusterSpec {
                cluster_id: "spec-id".to_string(),
                ..Default::default()
            },
        );
        if let Some(label) = label {
            let labels = BTreeMap::from([(CLUSTER_ID_LABEL.to_string(), label.to_string())]);
            cluster.metadata.labels = Some(labels);
        }
        cluster.status = status;
        cluster
    }

    #[test]
    fn test_from_managed_cluster_uses_label() {
        let cluster = managed_cluster(
            Some("c1"),
            Some(ManagedClusterStatus {
                api_server_url: "https://10.0.0.1:6443".to_string(),
                use_socket: true,
                ..Default::default()
            }),
        );

        let record = ClusterRecord::from_managed_cluster(&cluster).expect("record");
        assert_eq!(
            record,
            ClusterRecord::new("c1", "https://10.0.0.1:6443", true)
        );
    }

    #[test]
    fn test_from_managed_cluster_without_status() {
        let cluster = managed_cluster(Some("c1"), None);
        let record = ClusterRecord::from_managed_cluster(&cluster).expect("record");
        assert!(record.api_server_url.is_empty());
        assert!(!record.use_socket);
    }

    #[test]
    fn test_from_managed_cluster_without_label() {
        let cluster = managed_cluster(None, None);
        assert!(ClusterRecord::from_managed_cluster(&cluster).is_none());
    }

    #[test]
    fn test_record_yaml_shape() {
        let record: ClusterRecord = serde_json::from_value(serde_json::json!({
            "clusterId": "c2",
            "useSocket": true,
        }))
        .expect("record should deserialize");
        assert_eq!(record, ClusterRecord::new("c2", "", true));
    }
}
