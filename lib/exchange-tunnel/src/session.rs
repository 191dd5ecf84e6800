//! In-process table of live agent sessions

use crate::{BoxedStream, Dial, Dialer, TunnelError, TunnelService};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// A live session held open by a cluster's agent
#[async_trait]
pub trait Session: Send + Sync {
    /// Open a logical connection to `addr` as seen from the agent's side
    async fn open(&self, addr: &str) -> io::Result<BoxedStream>;
}

type Sessions = Arc<RwLock<HashMap<String, Arc<dyn Session>>>>;

/// SessionRegistry maps cluster ids to their current session.
///
/// Dialers handed out look the session up at dial time, so an agent that
/// reconnects is used by transports built before the reconnect.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Sessions,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the session for a cluster, returning the one it replaces
    pub fn register(
        &self,
        cluster_id: &str,
        session: Arc<dyn Session>,
    ) -> Option<Arc<dyn Session>> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = sessions.insert(cluster_id.to_string(), session);
        info!(cluster = %cluster_id, replaced = previous.is_some(), "Tunnel session registered");
        previous
    }

    /// Drop the session of a cluster; returns whether one existed
    pub fn unregister(&self, cluster_id: &str) -> bool {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = sessions.remove(cluster_id).is_some();
        if removed {
            info!(cluster = %cluster_id, "Tunnel session removed");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn session(&self, cluster_id: &str) -> Option<Arc<dyn Session>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cluster_id)
            .cloned()
    }
}

impl TunnelService for SessionRegistry {
    fn has_session(&self, cluster_id: &str) -> bool {
        self.session(cluster_id).is_some()
    }

    fn dialer(&self, cluster_id: &str) -> Dialer {
        Dialer::new(
            cluster_id,
            Arc::new(SessionDial {
                registry: self.clone(),
                cluster_id: cluster_id.to_string(),
            }),
        )
    }
}

struct SessionDial {
    registry: SessionRegistry,
    cluster_id: String,
}

#[async_trait]
impl Dial for SessionDial {
    async fn dial(&self, addr: &str) -> io::Result<BoxedStream> {
        let session = self
            .registry
            .session(&self.cluster_id)
            .ok_or_else(|| TunnelError::NoSession(self.cluster_id.clone()))?;

        debug!(cluster = %self.cluster_id, addr = %addr, "Dialing through tunnel session");

        session.open(addr).await.map_err(|source| {
            TunnelError::Dial {
                cluster_id: self.cluster_id.clone(),
                addr: addr.to_string(),
                source,
            }
            .into()
        })
    }
}
