//! Prometheus metrics for the exchange

use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics collector for dispatched exchanges.
///
/// Clones share the same registry and metrics.
#[derive(Clone)]
pub struct ExchangeMetrics {
    /// Exchanges handed to the executor, by dial mode
    pub requests_total: CounterVec,
    /// Exchanges rejected before or during proxying, by reason
    pub errors_total: CounterVec,
    /// Time from dispatch to response head, by dial mode
    pub request_duration_seconds: HistogramVec,
    /// Tunnel transports built, cached or one-off
    pub transports_created_total: Counter,
    /// Entries in the transport cache
    pub cached_transports: IntGauge,
    /// Lookups that matched more than one registry record
    pub registry_duplicate_matches_total: Counter,
    /// Protocol upgrades bridged between caller and destination
    pub upgrades_total: Counter,
    pub registry: Arc<Registry>,
}

impl ExchangeMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let requests_total = CounterVec::new(
            Opts::new("exchange_requests_total", "Total proxied exchanges"),
            &["mode"],
        )?;

        let errors_total = CounterVec::new(
            Opts::new("exchange_errors_total", "Total failed exchanges by reason"),
            &["reason"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "exchange_request_duration_seconds",
                "Latency until the destination answered, in seconds",
            ),
            &["mode"],
        )?;

        let transports_created_total = Counter::new(
            "exchange_transports_created_total",
            "Total tunnel transports built",
        )?;

        let cached_transports = IntGauge::new(
            "exchange_cached_transports",
            "Tunnel transports held in the cache",
        )?;

        let registry_duplicate_matches_total = Counter::new(
            "exchange_registry_duplicate_matches_total",
            "Cluster lookups that matched more than one registry record",
        )?;

        let upgrades_total = Counter::new(
            "exchange_upgrades_total",
            "Total upgraded connections bridged",
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(transports_created_total.clone()))?;
        registry.register(Box::new(cached_transports.clone()))?;
        registry.register(Box::new(registry_duplicate_matches_total.clone()))?;
        registry.register(Box::new(upgrades_total.clone()))?;

        Ok(Self {
            requests_total,
            errors_total,
            request_duration_seconds,
            transports_created_total,
            cached_transports,
            registry_duplicate_matches_total,
            upgrades_total,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
