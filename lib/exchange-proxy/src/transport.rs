//! Per-cluster transports

use crate::tls::{tunnel_client_config, ClientIdentity};
use exchange_tunnel::Dialer;
use rustls::ClientConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Connection pool settings carried by every transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_idle_conns: usize,
    pub idle_conn_timeout: Duration,
    pub tls_handshake_timeout: Duration,
    pub expect_continue_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_conns: 100,
            idle_conn_timeout: Duration::from_secs(90),
            tls_handshake_timeout: Duration::from_secs(10),
            expect_continue_timeout: Duration::from_secs(1),
        }
    }
}

/// HTTP transport bound to a cluster's tunnel session.
///
/// Server certificates are not verified; the tunnel is the trust boundary.
/// Cloning is cheap and a clone never aliases mutable state with the original.
#[derive(Clone)]
pub struct Transport {
    tls_config: Arc<ClientConfig>,
    dialer: Dialer,
    pool: PoolSettings,
}

impl Transport {
    pub fn tunneled(dialer: Dialer) -> Result<Self, rustls::Error> {
        Ok(Self {
            tls_config: tunnel_client_config(None)?,
            dialer,
            pool: PoolSettings::default(),
        })
    }

    /// Tunneled transport presenting `identity` as its client certificate
    pub fn tunneled_with_identity(
        dialer: Dialer,
        identity: ClientIdentity,
    ) -> Result<Self, rustls::Error> {
        Ok(Self {
            tls_config: tunnel_client_config(Some(identity))?,
            dialer,
            pool: PoolSettings::default(),
        })
    }

    pub fn tls_config(&self) -> &Arc<ClientConfig> {
        &self.tls_config
    }

    pub fn dialer(&self) -> &Dialer {
        &self.dialer
    }

    pub fn pool(&self) -> &PoolSettings {
        &self.pool
    }

    pub fn has_client_certificate(&self) -> bool {
        self.tls_config.client_auth_cert_resolver.has_certs()
    }

    /// Whether both transports came from the same construction
    pub fn shares_config_with(&self, other: &Transport) -> bool {
        Arc::ptr_eq(&self.tls_config, &other.tls_config)
            && self.dialer.same_binding(&other.dialer)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("cluster_id", &self.dialer.cluster_id())
            .field("client_certificate", &self.has_client_certificate())
            .field("pool", &self.pool)
            .finish()
    }
}
