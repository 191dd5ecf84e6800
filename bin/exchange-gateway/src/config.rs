//! Gateway configuration from the environment

use anyhow::{anyhow, Context, Result};
use exchange_proxy::dispatcher::DEFAULT_EXTRA_HEADER_PREFIX;
use exchange_proxy::DispatchConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub http_addr: SocketAddr,
    pub https_addr: SocketAddr,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// Static cluster records; the ManagedCluster reflector is used when unset
    pub clusters_file: Option<PathBuf>,
    pub dispatch: DispatchConfig,
    /// Raise tunnel and proxy logging to debug
    pub tunnel_logging: bool,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let http_addr = parse_addr(
            "EXCHANGE_HTTP_ADDR",
            var("EXCHANGE_HTTP_ADDR"),
            "0.0.0.0:8080",
        )?;
        let https_addr = parse_addr(
            "EXCHANGE_HTTPS_ADDR",
            var("EXCHANGE_HTTPS_ADDR"),
            "0.0.0.0:8443",
        )?;

        let extra_header_prefixes = match var("EXCHANGE_EXTRA_HEADER_PREFIXES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|prefix| !prefix.is_empty())
                .map(str::to_string)
                .collect(),
            None => vec![DEFAULT_EXTRA_HEADER_PREFIX.to_string()],
        };

        let dispatch = DispatchConfig {
            extra_header_prefixes,
            streaming_proxy_redirects: parse_bool(
                "EXCHANGE_FEATURE_STREAMING_PROXY_REDIRECTS",
                var("EXCHANGE_FEATURE_STREAMING_PROXY_REDIRECTS"),
                true,
            )?,
            validate_proxy_redirects: parse_bool(
                "EXCHANGE_FEATURE_VALIDATE_PROXY_REDIRECTS",
                var("EXCHANGE_FEATURE_VALIDATE_PROXY_REDIRECTS"),
                true,
            )?,
        };

        let log_format = match var("EXCHANGE_LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(anyhow!("unsupported EXCHANGE_LOG_FORMAT {}", other)),
        };

        Ok(Self {
            http_addr,
            https_addr,
            tls_cert: var("EXCHANGE_TLS_CERT").map(PathBuf::from),
            tls_key: var("EXCHANGE_TLS_KEY").map(PathBuf::from),
            clusters_file: var("EXCHANGE_CLUSTERS_FILE").map(PathBuf::from),
            dispatch,
            tunnel_logging: parse_bool(
                "EXCHANGE_TUNNEL_LOGGING",
                var("EXCHANGE_TUNNEL_LOGGING"),
                false,
            )?,
            log_format,
        })
    }

    /// Default tracing directives when RUST_LOG is unset
    pub fn default_log_filter(&self) -> &'static str {
        if self.tunnel_logging {
            "info,exchange_proxy=debug,exchange_tunnel=debug"
        } else {
            "info"
        }
    }
}

fn parse_addr(key: &str, value: Option<String>, default: &str) -> Result<SocketAddr> {
    let raw = value.unwrap_or_else(|| default.to_string());
    raw.parse()
        .with_context(|| format!("{} is not a socket address: {}", key, raw))
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> Result<bool> {
    let value = value.map(|v| v.trim().to_ascii_lowercase());
    match value.as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(anyhow!("{} must be a boolean, got {}", key, other)),
    }
}
