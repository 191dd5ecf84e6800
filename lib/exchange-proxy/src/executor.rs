//! The proxy executor seam

use crate::location::ResolvedLocation;
use crate::transport::Transport;
use async_trait::async_trait;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};

/// Body type flowing through the exchange in both directions
pub type ProxyBody = UnsyncBoxBody<Bytes, hyper::Error>;

pub fn full(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Behaviour switches handed to the executor with every exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyFlags {
    /// Follow redirects returned to upgrade requests
    pub intercept_redirects: bool,
    /// Only follow redirects that stay on the original host
    pub require_same_host_redirects: bool,
    /// Send the location host as the outbound `Host` header
    pub use_location_host: bool,
    pub upgrade_supported: bool,
}

/// One resolved request, ready to be proxied
#[derive(Debug, Clone)]
pub struct ProxyExchange {
    pub cluster_id: String,
    pub location: ResolvedLocation,
    /// `None` dials the location directly
    pub transport: Option<Transport>,
    pub flags: ProxyFlags,
}

/// Streams a request to its resolved location and the response back.
///
/// Implementations always answer; transport failures become error responses.
#[async_trait]
pub trait ProxyExecutor: Send + Sync {
    async fn execute(&self, request: Request<ProxyBody>, exchange: ProxyExchange)
        -> Response<ProxyBody>;
}
