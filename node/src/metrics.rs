//! # Prometheus Metrics
//!
//! Exposes ledger activity counters for the node. Scraped by Prometheus at
//! the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the node.
///
/// Clone-friendly (prometheus handles are `Arc`s internally) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Spend reservations opened.
    pub reservations_total: IntCounter,
    /// Claims settled as verified through the signed path.
    pub claims_verified_total: IntCounter,
    /// Claims refused: bad signature, unknown or already processed.
    pub claims_rejected_total: IntCounter,
    /// Reservations that expired and were refunded, by either path.
    pub reservations_expired_total: IntCounter,
    /// Tokens returned to wallets by expiry refunds.
    pub tokens_refunded_total: IntCounter,
    /// Reservations handed to polling machines.
    pub sweep_deliveries_total: IntCounter,
    /// Purchases credited after payment verification.
    pub purchases_total: IntCounter,
    /// Histogram of API request latency in seconds.
    pub request_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("arcadepay".into()), None)?;

        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let reservations_total = counter("reservations_total", "Spend reservations opened")?;
        let claims_verified_total =
            counter("claims_verified_total", "Machine claims settled as verified")?;
        let claims_rejected_total = counter(
            "claims_rejected_total",
            "Machine claims refused (signature, unknown or replayed)",
        )?;
        let reservations_expired_total = counter(
            "reservations_expired_total",
            "Reservations that expired and were refunded",
        )?;
        let tokens_refunded_total =
            counter("tokens_refunded_total", "Tokens refunded by reservation expiry")?;
        let sweep_deliveries_total = counter(
            "sweep_deliveries_total",
            "Reservations delivered to polling machines",
        )?;
        let purchases_total = counter("purchases_total", "Token purchases credited")?;

        let request_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "request_latency_seconds",
                "API request handling latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 10.0,
            ]),
        )?;
        registry.register(Box::new(request_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            reservations_total,
            claims_verified_total,
            claims_rejected_total,
            reservations_expired_total,
            tokens_refunded_total,
            sweep_deliveries_total,
            purchases_total,
            request_latency_seconds,
        })
    }

    /// Records one expiry refund.
    pub fn record_expiry(&self, refunded: u64) {
        self.reservations_expired_total.inc();
        self.tokens_refunded_total.inc_by(refunded);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
