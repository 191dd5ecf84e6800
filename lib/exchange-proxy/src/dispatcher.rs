//! Dispatching socket proxy requests to child clusters

use crate::cache::TransportCache;
use crate::credentials::inject;
use crate::executor::{ProxyBody, ProxyExchange, ProxyExecutor, ProxyFlags};
use crate::location::LocationResolver;
use crate::metrics::ExchangeMetrics;
use exchange_core::{ClusterRegistry, ExchangeError, Result};
use exchange_tunnel::TunnelService;
use hyper::{Request, Response};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_EXTRA_HEADER_PREFIX: &str = "X-Remote-Extra-";

const NOT_READY_MESSAGE: &str = "cache for ManagedCluster is not ready yet, please retry later";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Header prefixes carrying forwarded credentials
    pub extra_header_prefixes: Vec<String>,
    /// Follow redirects returned to upgrade requests
    pub streaming_proxy_redirects: bool,
    /// Require followed redirects to stay on the same host
    pub validate_proxy_redirects: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            extra_header_prefixes: vec![DEFAULT_EXTRA_HEADER_PREFIX.to_string()],
            streaming_proxy_redirects: true,
            validate_proxy_redirects: true,
        }
    }
}

/// Entry point of the exchange.
///
/// Waits for the registry, resolves the destination, picks a transport,
/// applies forwarded credentials and hands the request to the executor.
pub struct ExchangeDispatcher {
    registry: Arc<dyn ClusterRegistry>,
    tunnel: Arc<dyn TunnelService>,
    resolver: LocationResolver,
    transports: TransportCache,
    executor: Arc<dyn ProxyExecutor>,
    config: DispatchConfig,
    metrics: Option<ExchangeMetrics>,
}

impl ExchangeDispatcher {
    pub fn new(
        registry: Arc<dyn ClusterRegistry>,
        tunnel: Arc<dyn TunnelService>,
        executor: Arc<dyn ProxyExecutor>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            resolver: LocationResolver::new(registry.clone(), tunnel.clone()),
            transports: TransportCache::new(tunnel.clone()),
            registry,
            tunnel,
            executor,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ExchangeMetrics) -> Self {
        self.resolver = LocationResolver::new(self.registry.clone(), self.tunnel.clone())
            .with_metrics(metrics.clone());
        self.transports =
            TransportCache::new(self.tunnel.clone()).with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        self
    }

    pub fn transports(&self) -> &TransportCache {
        &self.transports
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn proxy_flags(&self) -> ProxyFlags {
        ProxyFlags {
            intercept_redirects: self.config.streaming_proxy_redirects,
            require_same_host_redirects: self.config.validate_proxy_redirects,
            use_location_host: true,
            upgrade_supported: true,
        }
    }

    /// Proxy `request` to `proxy_path` inside cluster `cluster_id`.
    ///
    /// Errors are returned before anything is sent to the destination;
    /// failures while proxying come back as error responses from the executor.
    pub async fn dispatch(
        &self,
        request: Request<ProxyBody>,
        cluster_id: &str,
        proxy_path: &str,
        cancel: &CancellationToken,
    ) -> Result<Response<ProxyBody>> {
        match self.prepare(request, cluster_id, proxy_path, cancel).await {
            Ok((request, exchange)) => Ok(self.executor.execute(request, exchange).await),
            Err(e) => {
                warn!(
                    cluster = %cluster_id,
                    reason = e.reason(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "Dispatch rejected"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.errors_total.with_label_values(&[e.reason()]).inc();
                }
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        request: Request<ProxyBody>,
        cluster_id: &str,
        proxy_path: &str,
        cancel: &CancellationToken,
    ) -> Result<(Request<ProxyBody>, ProxyExchange)> {
        let synced = tokio::select! {
            biased;
            synced = self.registry.wait_for_sync() => synced,
            _ = cancel.cancelled() => false,
        };
        if !synced {
            return Err(ExchangeError::NotReady(NOT_READY_MESSAGE.to_string()));
        }

        let (location, needs_tunnel) = self.resolver.resolve(cluster_id, proxy_path).await?;
        let base = if needs_tunnel {
            Some(self.transports.get_or_create(cluster_id)?)
        } else {
            None
        };

        let injection = inject(
            request.headers(),
            &self.config.extra_header_prefixes,
            cluster_id,
            base,
            self.tunnel.as_ref(),
        )?;

        debug!(
            cluster = %cluster_id,
            location = %location,
            tunneled = injection.transport.is_some(),
            "Request will be redialed"
        );

        let (mut parts, body) = request.into_parts();
        parts.headers = injection.headers;

        let exchange = ProxyExchange {
            cluster_id: cluster_id.to_string(),
            location,
            transport: injection.transport,
            flags: self.proxy_flags(),
        };
        Ok((Request::from_parts(parts, body), exchange))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{empty, full};
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use exchange_core::{ClusterRecord, StaticClusterRegistry};
    use exchange_tunnel::{BoxedStream, Dial, Dialer};
    use hyper::header::{HeaderMap, AUTHORIZATION};
    use hyper::StatusCode;
    use std::collections::HashSet;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Refuse;

    #[async_trait]
    impl Dial for Refuse {
        async fn dial(&self, _addr: &str) -> io::Result<BoxedStream> {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }
    }

    struct FakeTunnel {
        connected: HashSet<String>,
    }

    impl FakeTunnel {
        fn connected(ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                connected: ids.iter().map(|id| id.to_string()).collect(),
            })
        }
    }

    impl TunnelService for FakeTunnel {
        fn has_session(&self, cluster_id: &str) -> bool {
            self.connected.contains(cluster_id)
        }

        fn dialer(&self, cluster_id: &str) -> Dialer {
            Dialer::new(cluster_id, Arc::new(Refuse))
        }
    }

    /// Static registry that counts lookups
    struct CountingRegistry {
        inner: StaticClusterRegistry,
        lookups: AtomicUsize,
    }

    impl CountingRegistry {
        fn new(inner: StaticClusterRegistry) -> Arc<Self> {
            Arc::new(Self {
                inner,
                lookups: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ClusterRegistry for CountingRegistry {
        async fn wait_for_sync(&self) -> bool {
            self.inner.wait_for_sync().await
        }

        async fn clusters_by_id(&self, cluster_id: &str) -> Result<Vec<ClusterRecord>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inner.clusters_by_id(cluster_id).await
        }
    }

    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<(HeaderMap, ProxyExchange)>>,
    }

    impl RecordingExecutor {
        fn calls(&self) -> Vec<(HeaderMap, ProxyExchange)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProxyExecutor for RecordingExecutor {
        async fn execute(
            &self,
            request: Request<ProxyBody>,
            exchange: ProxyExchange,
        ) -> Response<ProxyBody> {
            self.seen
                .lock()
                .unwrap()
                .push((request.headers().clone(), exchange));
            Response::new(full("ok"))
        }
    }

    fn records() -> StaticClusterRegistry {
        StaticClusterRegistry::with_records(vec![
            ClusterRecord::new("direct-1", "https://10.0.0.1:6443", false),
            ClusterRecord::new("edge-1", "https://192.168.1.10:6443", true),
        ])
    }

    const SOCKET_URI: &str = "/apis/proxies.clusternet.io/v1alpha1/sockets/edge-1/proxy/direct/api";

    fn request() -> Request<ProxyBody> {
        Request::builder()
            .uri(SOCKET_URI)
            .header("X-Remote-Extra-Clusternet-Token", "secret")
            .header("X-Remote-Extra-Groups", "dev")
            .body(empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_cancellation_during_sync_wait() {
        let registry = CountingRegistry::new(StaticClusterRegistry::new());
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = ExchangeDispatcher::new(
            registry.clone(),
            FakeTunnel::connected(&[]),
            executor.clone(),
            DispatchConfig::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dispatcher
            .dispatch(request(), "edge-1", "/direct/api", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, ExchangeError::NotReady(NOT_READY_MESSAGE.to_string()));
        assert_eq!(registry.lookups.load(Ordering::SeqCst), 0);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_sync_then_dispatches() {
        let inner = StaticClusterRegistry::new();
        let record = ClusterRecord::new("direct-1", "https://10.0.0.1:6443", false);
        inner.register(record).await;
        let registry = CountingRegistry::new(inner);
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = Arc::new(ExchangeDispatcher::new(
            registry.clone(),
            FakeTunnel::connected(&[]),
            executor.clone(),
            DispatchConfig::default(),
        ));

        let task = {
            let dispatcher = dispatcher.clone();
            let cancel = CancellationToken::new();
            tokio::spawn(async move {
                dispatcher
                    .dispatch(request(), "direct-1", "/direct/api", &cancel)
                    .await
            })
        };
        tokio::task::yield_now().await;
        registry.inner.mark_synced();

        let response = task.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_direct_cluster_gets_no_transport() {
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = ExchangeDispatcher::new(
            Arc::new(records()),
            FakeTunnel::connected(&[]),
            executor.clone(),
            DispatchConfig::default(),
        );

        let cancel = CancellationToken::new();
        dispatcher
            .dispatch(request(), "direct-1", "/direct/api/v1", &cancel)
            .await
            .unwrap();

        let calls = executor.calls();
        let (headers, exchange) = &calls[0];
        assert!(exchange.transport.is_none());
        assert_eq!(
            exchange.location.to_string(),
            "https://10.0.0.1:6443/api/v1"
        );
        assert_eq!(headers[AUTHORIZATION], "Bearer secret");
        assert!(headers.get("x-remote-extra-groups").is_none());
        assert!(dispatcher.transports().is_empty());
    }

    #[tokio::test]
    async fn test_tunnel_cluster_uses_cached_transport() {
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = ExchangeDispatcher::new(
            Arc::new(records()),
            FakeTunnel::connected(&["edge-1"]),
            executor.clone(),
            DispatchConfig::default(),
        );

        let cancel = CancellationToken::new();
        for _ in 0..2 {
            dispatcher
                .dispatch(request(), "edge-1", "/direct/api", &cancel)
                .await
                .unwrap();
        }

        let calls = executor.calls();
        let first = calls[0].1.transport.as_ref().expect("tunnel transport");
        let second = calls[1].1.transport.as_ref().expect("tunnel transport");
        assert!(first.shares_config_with(second));
        assert_eq!(dispatcher.transports().len(), 1);
        assert_eq!(calls[0].1.flags, dispatcher.proxy_flags());
    }

    #[tokio::test]
    async fn test_disconnected_tunnel_is_rejected() {
        let metrics = ExchangeMetrics::new().unwrap();
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = ExchangeDispatcher::new(
            Arc::new(records()),
            FakeTunnel::connected(&[]),
            executor.clone(),
            DispatchConfig::default(),
        )
        .with_metrics(metrics.clone());

        let cancel = CancellationToken::new();
        let err = dispatcher
            .dispatch(request(), "edge-1", "/direct/api", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, ExchangeError::Disconnected("edge-1".into()));
        assert!(dispatcher.transports().is_empty());
        assert!(executor.calls().is_empty());
        let disconnected = metrics.errors_total.with_label_values(&["disconnected"]);
        assert_eq!(disconnected.get(), 1.0);
    }

    #[tokio::test]
    async fn test_malformed_certificate_never_executes() {
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = ExchangeDispatcher::new(
            Arc::new(records()),
            FakeTunnel::connected(&["edge-1"]),
            executor.clone(),
            DispatchConfig::default(),
        );

        let garbage = STANDARD.encode("garbage");
        let request = Request::builder()
            .uri("/")
            .header("X-Remote-Extra-Clusternet-Certificate", &garbage)
            .header("X-Remote-Extra-Clusternet-PrivateKey", &garbage)
            .body(empty())
            .unwrap();

        let cancel = CancellationToken::new();
        let err = dispatcher
            .dispatch(request, "edge-1", "/direct/api", &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ExchangeError::InvalidRequest(_)));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_feature_toggles_shape_flags() {
        let dispatcher = ExchangeDispatcher::new(
            Arc::new(records()),
            FakeTunnel::connected(&[]),
            Arc::new(RecordingExecutor::default()),
            DispatchConfig {
                streaming_proxy_redirects: false,
                validate_proxy_redirects: false,
                ..DispatchConfig::default()
            },
        );

        let flags = dispatcher.proxy_flags();
        assert!(!flags.intercept_redirects);
        assert!(!flags.require_same_host_redirects);
        assert!(flags.use_location_host && flags.upgrade_supported);
    }

    #[tokio::test]
    async fn test_unknown_cluster_propagates() {
        let dispatcher = ExchangeDispatcher::new(
            Arc::new(records()),
            FakeTunnel::connected(&[]),
            Arc::new(RecordingExecutor::default()),
            DispatchConfig::default(),
        );

        let err = dispatcher
            .dispatch(request(), "ghost", "/direct", &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ExchangeError::UnknownCluster("ghost".into()));
    }
}
