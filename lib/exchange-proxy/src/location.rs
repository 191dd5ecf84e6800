//! Resolving where a socket request goes

use crate::metrics::ExchangeMetrics;
use exchange_core::{ClusterRegistry, ExchangeError, Result};
use exchange_tunnel::TunnelService;
use hyper::Uri;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Leading path segment that selects the cluster's reported API server
pub const SHORT_PATH_SEGMENT: &str = "direct";

/// Destination of one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLocation {
    pub scheme: String,
    /// `host` or `host:port`; may be empty for a malformed explicit path
    pub host: String,
    /// Empty or rooted at `/`
    pub path: String,
}

impl ResolvedLocation {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            path: path.into(),
        }
    }

    /// Destination URI with the inbound raw query attached
    pub fn to_uri(&self, query: Option<&str>) -> Result<Uri> {
        let mut target = self.to_string();
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            target.push('?');
            target.push_str(query);
        }
        target
            .parse::<Uri>()
            .map_err(|e| ExchangeError::Internal(format!("invalid location {}: {}", target, e)))
    }
}

impl fmt::Display for ResolvedLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// Join path elements, cleaning `.` and `..`.
///
/// Returns an empty string when every element is empty, otherwise a path
/// rooted at `/`.
pub fn join_path<'a>(elements: impl IntoIterator<Item = &'a str>) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let mut any = false;

    for element in elements {
        if element.is_empty() {
            continue;
        }
        any = true;
        for segment in element.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                other => segments.push(other),
            }
        }
    }

    if !any {
        return String::new();
    }
    format!("/{}", segments.join("/"))
}

/// Turns a cluster id plus proxy path into a location and a dial mode
pub struct LocationResolver {
    registry: Arc<dyn ClusterRegistry>,
    tunnel: Arc<dyn TunnelService>,
    metrics: Option<ExchangeMetrics>,
}

impl LocationResolver {
    pub fn new(
        registry: Arc<dyn ClusterRegistry>,
        tunnel: Arc<dyn TunnelService>,
    ) -> Self {
        Self {
            registry,
            tunnel,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ExchangeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Resolve the destination; the flag tells whether it must be reached through the tunnel
    pub async fn resolve(
        &self,
        cluster_id: &str,
        request_path: &str,
    ) -> Result<(ResolvedLocation, bool)> {
        let records = self.registry.clusters_by_id(cluster_id).await?;
        let record = match records.as_slice() {
            [] => return Err(ExchangeError::UnknownCluster(cluster_id.to_string())),
            [only] => only,
            [first, ..] => {
                warn!(
                    cluster = %cluster_id,
                    matches = records.len(),
                    "Found multiple ManagedCluster objects for one cluster id, using the first"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.registry_duplicate_matches_total.inc();
                }
                first
            }
        };

        let trimmed = request_path.strip_prefix('/').unwrap_or(request_path);
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts[0].is_empty() {
            return Err(ExchangeError::InvalidRequest(
                "invalid request path".to_string(),
            ));
        }

        let location = if parts[0] == SHORT_PATH_SEGMENT {
            if record.api_server_url.is_empty() {
                return Err(ExchangeError::Unavailable(format!(
                    "cannot retrieve valid apiserver url for cluster {}",
                    cluster_id
                )));
            }
            let base = Url::parse(&record.api_server_url)
                .map_err(|e| ExchangeError::Internal(e.to_string()))?;

            let host = match (base.host_str(), base.port()) {
                (Some(host), Some(port)) => format!("{}:{}", host, port),
                (Some(host), None) => host.to_string(),
                (None, _) => String::new(),
            };
            // `Url` reports "/" for a bare authority; that base has no path of its own
            let base_path = if base.path() == "/" && !record.api_server_url.ends_with('/') {
                ""
            } else {
                base.path()
            };
            let segments = parts[1..].iter().copied();
            let path = join_path(std::iter::once(base_path).chain(segments));
            ResolvedLocation::new(base.scheme(), host, path)
        } else {
            let host = parts.get(1).copied().unwrap_or_default();
            let path = join_path(parts.iter().skip(2).copied());
            ResolvedLocation::new(parts[0], host, path)
        };

        let needs_tunnel = record.use_socket;
        if needs_tunnel && !self.tunnel.has_session(cluster_id) {
            return Err(ExchangeError::Disconnected(cluster_id.to_string()));
        }

        debug!(cluster = %cluster_id, location = %location, needs_tunnel, "Resolved location");
        Ok((location, needs_tunnel))
    }
}
