//! Cluster exchange: redial HTTP requests to child clusters
//!
//! The dispatcher resolves where a socket request should go, picks a direct
//! or tunneled transport, rewrites forwarded credentials and hands the
//! exchange to a proxy executor.
pub mod cache;
pub mod connector;
pub mod credentials;
pub mod dispatcher;
pub mod executor;
pub mod forwarder;
pub mod location;
pub mod metrics;
pub mod responder;
pub mod tls;
pub mod transport;

pub use cache::TransportCache;
pub use credentials::{CredentialSet, Injection};
pub use dispatcher::{DispatchConfig, ExchangeDispatcher};
pub use executor::{ProxyBody, ProxyExchange, ProxyExecutor, ProxyFlags};
pub use forwarder::HyperProxyExecutor;
pub use location::{LocationResolver, ResolvedLocation};
pub use metrics::ExchangeMetrics;
pub use responder::error_response;
pub use transport::{PoolSettings, Transport};
