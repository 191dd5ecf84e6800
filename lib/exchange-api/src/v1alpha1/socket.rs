//! Socket subresource paths
//!
//! Requests for a cluster arrive under
//! `/apis/proxies.clusternet.io/v1alpha1/sockets/{cluster-id}`. The bare path
//! is the agent's session endpoint; `.../proxy/{path...}` is a request to be
//! redialed through that cluster.

/// Path prefix of every socket route
pub const SOCKETS_PATH_PREFIX: &str = "/apis/proxies.clusternet.io/v1alpha1/sockets/";

const PROXY_SEGMENT: &str = "proxy";

/// A request path matched against the socket routes
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketRoute<'a> {
    /// `/sockets/{cluster-id}`: the cluster id is the trailing segment
    Session { cluster_id: &'a str },
    /// `/sockets/{cluster-id}/proxy/{path...}`
    Proxy { cluster_id: &'a str, path: &'a str },
}

/// Match a request path against the socket routes.
///
/// Returns `None` for paths outside the prefix, paths without a cluster id,
/// and subresources other than `proxy`.
pub fn parse_socket_path(path: &str) -> Option<SocketRoute<'_>> {
    let rest = path.strip_prefix(SOCKETS_PATH_PREFIX)?;

    let (cluster_id, tail) = match rest.split_once('/') {
        Some((id, tail)) => (id, tail),
        None => (rest, ""),
    };
    if cluster_id.is_empty() {
        return None;
    }

    if tail.trim_end_matches('/').is_empty() {
        return Some(SocketRoute::Session { cluster_id });
    }

    let proxied = tail.strip_prefix(PROXY_SEGMENT)?;
    if !proxied.is_empty() && !proxied.starts_with('/') {
        return None;
    }

    Some(SocketRoute::Proxy {
        cluster_id,
        path: proxied,
    })
}
