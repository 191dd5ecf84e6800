//! Tunnel session capability
//!
//! Agents of unreachable clusters hold a session open towards the control
//! plane. This library exposes what the exchange needs from those sessions:
//! - TunnelService: does a cluster have a live session, and a dialer bound to it
//! - Dialer: opens logical connections through whatever session is current
//! - SessionRegistry: in-process table of live sessions keyed by cluster id

pub mod dialer;
pub mod error;
pub mod session;

pub use dialer::{BoxedStream, Dial, Dialer, TunnelIo};
pub use error::TunnelError;
pub use session::{Session, SessionRegistry};

/// What the exchange consumes from the tunnel layer
pub trait TunnelService: Send + Sync {
    /// Whether the cluster's agent currently holds a session
    fn has_session(&self, cluster_id: &str) -> bool;

    /// A dialer that opens connections through the cluster's session
    fn dialer(&self, cluster_id: &str) -> Dialer;
}
