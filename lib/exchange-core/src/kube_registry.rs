//! ClusterRegistry backed by a reflector over ManagedCluster objects

use crate::{ClusterRecord, ClusterRegistry, Result};
use async_trait::async_trait;
use exchange_api::{ManagedCluster, CLUSTER_ID_LABEL};
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::reflector::{self, Store};
use kube_runtime::{watcher, WatchStreamExt};
use tracing::{debug, info, warn};

/// Registry reading from a local cache of labelled ManagedCluster objects.
///
/// Lookups never hit the API server; they read the reflector store.
pub struct KubeClusterRegistry {
    store: Store<ManagedCluster>,
}

impl KubeClusterRegistry {
    /// Start watching ManagedClusters across all namespaces.
    ///
    /// The watch runs on a background task for the lifetime of the process.
    pub fn start(client: Client) -> Self {
        let clusters: Api<ManagedCluster> = Api::all(client);
        let (store, writer) = reflector::store();

        let config = watcher::Config::default().labels(CLUSTER_ID_LABEL);
        let stream = watcher(clusters, config)
            .default_backoff()
            .reflect(writer)
            .applied_objects();

        tokio::spawn(async move {
            let mut stream = Box::pin(stream);
            while let Some(event) = stream.next().await {
                match event {
                    Ok(cluster) => {
                        debug!(
                            name = %cluster.name_any(),
                            namespace = ?cluster.namespace(),
                            "ManagedCluster updated"
                        )
                    }
                    Err(e) => warn!(error = %e, "ManagedCluster watch error"),
                }
            }
            info!("ManagedCluster watch stream ended");
        });

        Self { store }
    }
}

#[async_trait]
impl ClusterRegistry for KubeClusterRegistry {
    async fn wait_for_sync(&self) -> bool {
        self.store.wait_until_ready().await.is_ok()
    }

    async fn clusters_by_id(&self, cluster_id: &str) -> Result<Vec<ClusterRecord>> {
        let mut matching: Vec<_> = self
            .store
            .state()
            .into_iter()
            .filter(|cluster| {
                cluster.labels().get(CLUSTER_ID_LABEL).map(String::as_str) == Some(cluster_id)
            })
            .collect();
        // Store order is unspecified; keep "first match" stable across calls
        matching.sort_by_key(|cluster| (cluster.namespace(), cluster.name_any()));

        Ok(matching
            .iter()
            .filter_map(|cluster| ClusterRecord::from_managed_cluster(cluster))
            .collect())
    }
}
