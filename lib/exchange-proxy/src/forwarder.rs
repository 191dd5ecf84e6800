//! Streaming reverse proxy executor built on the hyper client
//!
//! Bodies are streamed in both directions. Upgrade requests keep their
//! `Connection`/`Upgrade` headers and, on `101 Switching Protocols`, the
//! caller's connection is spliced onto the destination's.

use crate::connector::ExchangeConnector;
use crate::executor::{empty, ProxyBody, ProxyExchange, ProxyExecutor};
use crate::metrics::ExchangeMetrics;
use crate::responder::error_response;
use crate::transport::{PoolSettings, Transport};
use async_trait::async_trait;
use exchange_core::{ExchangeError, Result};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::{HeaderMap, HeaderValue, CONNECTION, HOST, LOCATION, UPGRADE};
use hyper::{Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use std::error::Error as StdError;
use std::time::Instant;
use tokio::io::copy_bidirectional;
use tracing::{debug, info, warn};
use url::Url;

/// Redirects followed for a single upgrade request
pub const MAX_REDIRECTS: usize = 10;

type ExchangeClient = Client<ExchangeConnector, ProxyBody>;

/// Proxies exchanges over hyper, dialing through the exchange's transport
#[derive(Clone, Default)]
pub struct HyperProxyExecutor {
    metrics: Option<ExchangeMetrics>,
}

impl HyperProxyExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: ExchangeMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn client(transport: Option<&Transport>) -> Result<ExchangeClient> {
        let connector = ExchangeConnector::for_transport(transport)
            .map_err(|e| ExchangeError::Internal(e.to_string()))?;
        let pool = transport.map(|t| *t.pool()).unwrap_or_default();
        debug!(tunneled = connector.is_tunneled(), "Built exchange client");
        Ok(client_with_pool(connector, pool))
    }

    async fn forward(
        &self,
        request: Request<ProxyBody>,
        exchange: &ProxyExchange,
    ) -> Result<Response<ProxyBody>> {
        let client = Self::client(exchange.transport.as_ref())?;

        if exchange.flags.upgrade_supported && is_upgrade_request(request.headers()) {
            return self.forward_upgrade(client, request, exchange).await;
        }

        let inbound_path = request.uri().path().to_string();
        let query = request.uri().query().map(str::to_string);

        let mut location = exchange.location.clone();
        if !location.path.ends_with('/') && inbound_path.ends_with('/') {
            location.path.push('/');
        }
        if location.path.is_empty() {
            return moved_permanently(&inbound_path, query.as_deref());
        }

        let uri = location.to_uri(query.as_deref())?;
        let (mut parts, body) = request.into_parts();
        strip_hop_by_hop(&mut parts.headers, false);
        if exchange.flags.use_location_host {
            set_host(&mut parts.headers, &uri)?;
        }
        parts.uri = uri;
        parts.version = Version::HTTP_11;

        debug!(
            cluster = %exchange.cluster_id,
            method = %parts.method,
            target = %parts.uri,
            "Forwarding request"
        );

        let response = client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| ExchangeError::Proxy(describe(&e)))?;

        debug!(
            cluster = %exchange.cluster_id,
            status = %response.status(),
            "Destination responded"
        );
        Ok(into_proxy_response(response, false))
    }

    async fn forward_upgrade(
        &self,
        client: ExchangeClient,
        mut request: Request<ProxyBody>,
        exchange: &ProxyExchange,
    ) -> Result<Response<ProxyBody>> {
        let inbound_upgrade = hyper::upgrade::on(&mut request);
        let query = request.uri().query().map(str::to_string);
        let (mut parts, body) = request.into_parts();
        strip_hop_by_hop(&mut parts.headers, true);

        let original = exchange.location.to_uri(query.as_deref())?;
        let mut target = original.clone();
        let mut body = Some(body);
        let mut redirects = 0;

        let mut response = loop {
            let mut headers = parts.headers.clone();
            if exchange.flags.use_location_host {
                set_host(&mut headers, &target)?;
            }

            let mut outbound = Request::new(body.take().unwrap_or_else(empty));
            *outbound.method_mut() = parts.method.clone();
            *outbound.uri_mut() = target.clone();
            *outbound.headers_mut() = headers;

            let response = client
                .request(outbound)
                .await
                .map_err(|e| ExchangeError::Proxy(describe(&e)))?;

            if !exchange.flags.intercept_redirects {
                break response;
            }
            let Some(next) = redirect_target(&response, &target) else {
                break response;
            };

            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(ExchangeError::Proxy(format!(
                    "too many redirects ({}) for {}",
                    redirects, original
                )));
            }
            if exchange.flags.require_same_host_redirects && next.host() != original.host() {
                return Err(ExchangeError::Proxy(format!(
                    "hostname mismatch: expected {}, found {}",
                    original.host().unwrap_or_default(),
                    next.host().unwrap_or_default()
                )));
            }

            debug!(
                cluster = %exchange.cluster_id,
                from = %target,
                to = %next,
                "Following upgrade redirect"
            );
            target = next;
        };

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Ok(into_proxy_response(response, false));
        }

        let outbound_upgrade = hyper::upgrade::on(&mut response);
        let cluster_id = exchange.cluster_id.clone();
        if let Some(metrics) = &self.metrics {
            metrics.upgrades_total.inc();
        }

        tokio::spawn(async move {
            match tokio::try_join!(inbound_upgrade, outbound_upgrade) {
                Ok((inbound, outbound)) => {
                    let mut inbound = TokioIo::new(inbound);
                    let mut outbound = TokioIo::new(outbound);
                    match copy_bidirectional(&mut inbound, &mut outbound).await {
                        Ok((up, down)) => {
                            debug!(cluster = %cluster_id, up, down, "Upgraded connection closed")
                        }
                        Err(e) => {
                            debug!(cluster = %cluster_id, error = %e, "Upgraded connection ended")
                        }
                    }
                }
                Err(e) => {
                    warn!(cluster = %cluster_id, error = %e, "Failed to upgrade connection")
                }
            }
        });

        info!(cluster = %exchange.cluster_id, target = %target, "Switching protocols");
        Ok(into_proxy_response(response, true))
    }
}

#[async_trait]
impl ProxyExecutor for HyperProxyExecutor {
    async fn execute(
        &self,
        request: Request<ProxyBody>,
        exchange: ProxyExchange,
    ) -> Response<ProxyBody> {
        let mode = if exchange.transport.is_some() {
            "tunnel"
        } else {
            "direct"
        };
        let started = Instant::now();

        let response = match self.forward(request, &exchange).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    cluster = %exchange.cluster_id,
                    location = %exchange.location,
                    error = %e,
                    "Proxy failed"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.errors_total.with_label_values(&[e.reason()]).inc();
                }
                error_response(&e)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.requests_total.with_label_values(&[mode]).inc();
            metrics
                .request_duration_seconds
                .with_label_values(&[mode])
                .observe(started.elapsed().as_secs_f64());
        }
        response
    }
}

fn client_with_pool(connector: ExchangeConnector, pool: PoolSettings) -> ExchangeClient {
    Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_idle_timeout(pool.idle_conn_timeout)
        .pool_max_idle_per_host(pool.max_idle_conns)
        .build(connector)
}

/// Error message including its source chain
fn describe(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn moved_permanently(path: &str, query: Option<&str>) -> Result<Response<ProxyBody>> {
    let mut target = format!("{}/", path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }
    let location = HeaderValue::from_str(&target)
        .map_err(|e| ExchangeError::Internal(format!("invalid redirect location: {}", e)))?;

    let mut response = Response::new(empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    response.headers_mut().insert(LOCATION, location);
    Ok(response)
}

fn set_host(headers: &mut HeaderMap, uri: &Uri) -> Result<()> {
    let authority = uri
        .authority()
        .ok_or_else(|| ExchangeError::Internal(format!("no host in {}", uri)))?;
    let host = HeaderValue::from_str(authority.as_str())
        .map_err(|e| ExchangeError::Internal(format!("invalid host {}: {}", authority, e)))?;
    headers.insert(HOST, host);
    Ok(())
}

fn into_proxy_response(response: Response<Incoming>, upgraded: bool) -> Response<ProxyBody> {
    let mut response = response.map(|body| body.boxed_unsync());
    strip_hop_by_hop(response.headers_mut(), upgraded);
    response
}

/// Check if header is hop-by-hop (should not be forwarded)
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name,
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Remove hop-by-hop headers, keeping `Connection`/`Upgrade` for upgrades
fn strip_hop_by_hop(headers: &mut HeaderMap, keep_upgrade: bool) {
    let doomed: Vec<_> = headers
        .keys()
        .filter(|name| {
            let keep = keep_upgrade && (**name == CONNECTION || **name == UPGRADE);
            !keep && is_hop_by_hop_header(name.as_str())
        })
        .cloned()
        .collect();
    for name in doomed {
        headers.remove(name);
    }
}

/// `Connection: upgrade` together with an `Upgrade` header
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let wants_upgrade = headers.get_all(CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|v| {
                v.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false)
    });
    wants_upgrade && headers.contains_key(UPGRADE)
}

/// Absolute target of a redirect response, resolved against `current`
fn redirect_target<B>(response: &Response<B>, current: &Uri) -> Option<Uri> {
    let status = response.status();
    if !status.is_redirection() || status == StatusCode::NOT_MODIFIED {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    let next = Url::parse(&current.to_string()).ok()?.join(location).ok()?;
    next.as_str().parse().ok()
}
