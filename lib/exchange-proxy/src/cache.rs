//! Per-cluster transport cache

use crate::metrics::ExchangeMetrics;
use crate::transport::Transport;
use exchange_core::{ExchangeError, Result};
use exchange_tunnel::TunnelService;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Holds at most one tunneled transport per cluster id.
///
/// Entries are never evicted; they live as long as the cache. Callers get a
/// clone, so nothing they do to it leaks back into the cached instance.
pub struct TransportCache {
    tunnel: Arc<dyn TunnelService>,
    transports: Mutex<HashMap<String, Arc<Transport>>>,
    metrics: Option<ExchangeMetrics>,
}

impl TransportCache {
    pub fn new(tunnel: Arc<dyn TunnelService>) -> Self {
        Self {
            tunnel,
            transports: Mutex::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ExchangeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Return a clone of the cluster's transport, building it on first use
    pub fn get_or_create(&self, cluster_id: &str) -> Result<Transport> {
        let cached = {
            let mut transports = self
                .transports
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match transports.get(cluster_id) {
                Some(existing) => existing.clone(),
                None => {
                    let transport = Transport::tunneled(self.tunnel.dialer(cluster_id))
                        .map_err(|e| ExchangeError::Internal(e.to_string()))?;
                    let created = Arc::new(transport);
                    transports.insert(cluster_id.to_string(), created.clone());

                    debug!(cluster = %cluster_id, "Created tunnel transport");
                    if let Some(metrics) = &self.metrics {
                        metrics.transports_created_total.inc();
                        metrics.cached_transports.set(transports.len() as i64);
                    }
                    created
                }
            }
        };

        Ok(Transport::clone(&cached))
    }

    pub fn contains(&self, cluster_id: &str) -> bool {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(cluster_id)
    }

    pub fn len(&self) -> usize {
        self.transports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
