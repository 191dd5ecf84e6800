//! Cluster registry capability and an in-memory source

use crate::{ClusterRecord, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

/// Read-only view of the clusters known to the control plane
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// Resolve once the initial listing is complete.
    ///
    /// Returns `false` when the registry can never become ready.
    async fn wait_for_sync(&self) -> bool;

    /// All records labelled with `cluster_id`. More than one match is a
    /// registry inconsistency the caller decides how to handle.
    async fn clusters_by_id(&self, cluster_id: &str) -> Result<Vec<ClusterRecord>>;
}

/// In-memory registry fed by the caller, e.g. from a static clusters file
pub struct StaticClusterRegistry {
    records: Arc<RwLock<Vec<ClusterRecord>>>,
    synced: watch::Sender<bool>,
}

#[derive(Debug, Deserialize)]
struct ClustersFile {
    #[serde(default)]
    clusters: Vec<ClusterRecord>,
}

impl StaticClusterRegistry {
    /// Create an empty registry that has not synced yet
    pub fn new() -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            synced,
        }
    }

    /// Create a registry holding `records`, already synced
    pub fn with_records(records: Vec<ClusterRecord>) -> Self {
        let (synced, _) = watch::channel(true);
        Self {
            records: Arc::new(RwLock::new(records)),
            synced,
        }
    }

    /// Parse a YAML document of the form `clusters: [{clusterId, apiServerUrl, useSocket}]`
    pub fn from_yaml(document: &str) -> std::result::Result<Self, serde_yaml::Error> {
        let file: ClustersFile = serde_yaml::from_str(document)?;
        debug!("Loaded {} cluster record(s) from YAML", file.clusters.len());
        Ok(Self::with_records(file.clusters))
    }

    /// Add a record. Duplicated cluster ids are kept, as a real registry may hold them.
    pub async fn register(&self, record: ClusterRecord) {
        let mut records = self.records.write().await;
        debug!("Registered cluster: {}", record.cluster_id);
        records.push(record);
    }

    /// Remove every record for a cluster id
    pub async fn deregister(&self, cluster_id: &str) {
        let mut records = self.records.write().await;
        records.retain(|record| record.cluster_id != cluster_id);
        debug!("Deregistered cluster: {}", cluster_id);
    }

    /// Mark the initial listing as complete, releasing waiting requests
    pub fn mark_synced(&self) {
        self.synced.send_replace(true);
    }

    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Get count of registered records
    pub async fn cluster_count(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for StaticClusterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterRegistry for StaticClusterRegistry {
    async fn wait_for_sync(&self) -> bool {
        let mut synced = self.synced.subscribe();
        let ready = synced.wait_for(|ready| *ready).await.is_ok();
        ready
    }

    async fn clusters_by_id(&self, cluster_id: &str) -> Result<Vec<ClusterRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|record| record.cluster_id == cluster_id)
            .cloned()
            .collect())
    }
}
