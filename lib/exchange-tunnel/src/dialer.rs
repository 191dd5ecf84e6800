//! Dialing through a tunnel session

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Byte stream opened through a tunnel (or a plain socket)
pub trait TunnelIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelIo for T {}

pub type BoxedStream = Box<dyn TunnelIo>;

/// Opens a connection to `addr` (`host:port`)
#[async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self, addr: &str) -> io::Result<BoxedStream>;
}

/// Dial function bound to one cluster.
///
/// Clones share the same binding; `same_binding` tells whether two dialers
/// came from the same construction.
#[derive(Clone)]
pub struct Dialer {
    cluster_id: Arc<str>,
    inner: Arc<dyn Dial>,
}

impl Dialer {
    pub fn new(cluster_id: &str, inner: Arc<dyn Dial>) -> Self {
        Self {
            cluster_id: Arc::from(cluster_id),
            inner,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    pub async fn dial(&self, addr: &str) -> io::Result<BoxedStream> {
        self.inner.dial(addr).await
    }

    pub fn same_binding(&self, other: &Dialer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) && self.cluster_id == other.cluster_id
    }
}

impl fmt::Debug for Dialer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialer")
            .field("cluster_id", &self.cluster_id)
            .finish_non_exhaustive()
    }
}
