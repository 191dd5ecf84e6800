use anyhow::{Context, Result};
use exchange_core::{ClusterRegistry, KubeClusterRegistry, StaticClusterRegistry};
use exchange_proxy::executor::full;
use exchange_proxy::{
    error_response, ExchangeDispatcher, ExchangeMetrics, HyperProxyExecutor, ProxyBody,
};
use exchange_tunnel::SessionRegistry;
use http_body_util::BodyExt;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{
    body::Incoming, server::conn::http1, service::service_fn, Request, Response, StatusCode,
};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod router;

use config::{GatewayConfig, LogFormat};
use router::Route;

/// Shared state handed to every connection
struct Gateway {
    dispatcher: ExchangeDispatcher,
    metrics: ExchangeMetrics,
    shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = GatewayConfig::from_env()?;
    init_tracing(&config);

    // The Kubernetes client builds its TLS config from the process default provider
    let provider = rustls::crypto::ring::default_provider();
    if provider.install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting exchange-gateway...");

    let metrics = ExchangeMetrics::new().context("Failed to create metrics collector")?;
    info!("Metrics collector initialized");

    let registry = build_registry(&config).await?;

    // Agent sessions are registered by the tunnel server; none exist at startup
    let sessions = Arc::new(SessionRegistry::new());

    let executor = Arc::new(HyperProxyExecutor::new().with_metrics(metrics.clone()));
    let dispatcher = ExchangeDispatcher::new(registry, sessions, executor, config.dispatch.clone())
        .with_metrics(metrics.clone());
    info!(
        prefixes = ?config.dispatch.extra_header_prefixes,
        streaming_proxy_redirects = config.dispatch.streaming_proxy_redirects,
        validate_proxy_redirects = config.dispatch.validate_proxy_redirects,
        "Exchange dispatcher initialized"
    );

    let shutdown = CancellationToken::new();
    let gateway = Arc::new(Gateway {
        dispatcher,
        metrics,
        shutdown: shutdown.clone(),
    });

    if let Some(acceptor) = load_tls_acceptor(&config) {
        let https_listener = TcpListener::bind(config.https_addr).await?;
        info!("HTTPS server listening on {}", config.https_addr);
        let https = accept_connections(https_listener, Some(acceptor), gateway.clone());
        tokio::spawn(https);
    } else {
        warn!("TLS not configured - HTTPS listener not started");
        warn!("Set EXCHANGE_TLS_CERT and EXCHANGE_TLS_KEY to enable HTTPS");
    }

    let http_listener = TcpListener::bind(config.http_addr).await?;
    info!("HTTP server listening on {}", config.http_addr);

    tokio::select! {
        _ = accept_connections(http_listener, None, gateway.clone()) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    shutdown.cancel();
    Ok(())
}

fn init_tracing(config: &GatewayConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_log_filter()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

async fn build_registry(config: &GatewayConfig) -> Result<Arc<dyn ClusterRegistry>> {
    match &config.clusters_file {
        Some(path) => {
            let document = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read clusters file {}", path.display()))?;
            let registry = StaticClusterRegistry::from_yaml(&document)
                .with_context(|| format!("Failed to parse clusters file {}", path.display()))?;
            let clusters = registry.cluster_count().await;
            info!(
                clusters,
                "Static cluster registry loaded from {}",
                path.display()
            );
            Ok(Arc::new(registry))
        }
        None => {
            let client = kube::Client::try_default()
                .await
                .context("Failed to create Kubernetes client")?;
            info!("Watching ManagedCluster objects");
            Ok(Arc::new(KubeClusterRegistry::start(client)))
        }
    }
}

/// Load the listener certificate named by the configuration
fn load_tls_acceptor(config: &GatewayConfig) -> Option<TlsAcceptor> {
    let (cert_path, key_path) = match (&config.tls_cert, &config.tls_key) {
        (Some(cert), Some(key)) => (cert, key),
        _ => return None,
    };

    let (cert, key) = match (std::fs::read(cert_path), std::fs::read(key_path)) {
        (Ok(cert), Ok(key)) => (cert, key),
        (cert_err, key_err) => {
            if cert_err.is_err() {
                warn!("Failed to read TLS cert from {}", cert_path.display());
            }
            if key_err.is_err() {
                warn!("Failed to read TLS key from {}", key_path.display());
            }
            return None;
        }
    };

    match exchange_proxy::tls::server_config_from_pem(&cert, &key) {
        Ok(server_config) => {
            info!(
                "TLS configuration loaded from {} and {}",
                cert_path.display(),
                key_path.display()
            );
            Some(TlsAcceptor::from(server_config))
        }
        Err(e) => {
            warn!("Failed to parse TLS configuration: {}", e);
            None
        }
    }
}

async fn accept_connections(
    listener: TcpListener,
    tls_acceptor: Option<TlsAcceptor>,
    gateway: Arc<Gateway>,
) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Error accepting connection: {}", e);
                continue;
            }
        };

        let tls_acceptor = tls_acceptor.clone();
        let gateway = gateway.clone();
        tokio::spawn(async move {
            match tls_acceptor {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(tls_stream) => serve(tls_stream, peer_addr, gateway).await,
                    Err(e) => debug!("TLS error from {}: {}", peer_addr, e),
                },
                None => serve(stream, peer_addr, gateway).await,
            }
        });
    }
}

async fn serve<S>(stream: S, peer_addr: SocketAddr, gateway: Arc<Gateway>)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let service = service_fn(move |req| handle_request(req, gateway.clone()));

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!("Error serving connection from {}: {}", peer_addr, e);
    }
}

async fn handle_request(
    req: Request<Incoming>,
    gateway: Arc<Gateway>,
) -> Result<Response<ProxyBody>, Infallible> {
    let span = info_span!(
        "request",
        id = %Uuid::new_v4(),
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let path = req.uri().path().to_string();

        let (cluster_id, proxy_path) = match router::route(req.method(), &path) {
            Route::Metrics => return Ok(metrics_response(&gateway.metrics)),
            Route::Healthz => return Ok(text_response(StatusCode::OK, "OK\n")),
            Route::Session { cluster_id } => {
                debug!(cluster = %cluster_id, "Session endpoint is not served by this gateway");
                return Ok(text_response(StatusCode::NOT_FOUND, "Not Found\n"));
            }
            Route::NotFound => return Ok(text_response(StatusCode::NOT_FOUND, "Not Found\n")),
            Route::Proxy { cluster_id, path } => (cluster_id.to_string(), path.to_string()),
        };

        let cancel = gateway.shutdown.child_token();
        let request = req.map(|body| body.boxed_unsync());
        let response = match gateway
            .dispatcher
            .dispatch(request, &cluster_id, &proxy_path, &cancel)
            .await
        {
            Ok(response) => response,
            Err(e) => error_response(&e),
        };

        debug!(status = %response.status(), "Request completed");
        Ok(response)
    }
    .instrument(span)
    .await
}

fn text_response(status: StatusCode, body: &'static str) -> Response<ProxyBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
}

fn metrics_response(metrics: &ExchangeMetrics) -> Response<ProxyBody> {
    let metrics_text = metrics
        .gather()
        .unwrap_or_else(|_| "Failed to gather metrics\n".to_string());
    let mut response = Response::new(full(metrics_text));
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    response
}
