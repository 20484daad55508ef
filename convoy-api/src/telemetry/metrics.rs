//! Prometheus Metrics Definitions
//!
//! Defines all CONVOY metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<ConvoyMetrics>> = Lazy::new(ConvoyMetrics::new);

fn register_failed(name: &str) -> impl FnOnce(prometheus::Error) -> ApiError + '_ {
    move |e| ApiError::internal_error(format!("Failed to register {}: {}", name, e))
}

/// Container for all CONVOY metrics.
#[derive(Clone)]
pub struct ConvoyMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Appended events - labels: event_type
    pub events_appended_total: CounterVec,

    /// Currently connected stream clients
    pub stream_clients: Gauge,

    /// Events evicted from client buffers before delivery
    pub stream_events_dropped_total: Counter,

    /// Healthy to unhealthy buffer crossings
    pub stream_backpressure_signals_total: Counter,

    /// Granted leases - labels: mode
    pub reservations_granted_total: CounterVec,

    /// Contested paths returned by reserve
    pub reservation_conflicts_total: Counter,

    /// Projection rebuilds - labels: outcome
    pub projection_rebuilds_total: CounterVec,
}

impl ConvoyMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "convoy_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(register_failed("http_requests_total"))?,

            http_request_duration_seconds: register_histogram_vec!(
                "convoy_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(register_failed("http_request_duration_seconds"))?,

            events_appended_total: register_counter_vec!(
                "convoy_events_appended_total",
                "Total number of events appended through the API",
                &["event_type"]
            )
            .map_err(register_failed("events_appended_total"))?,

            stream_clients: register_gauge!(
                "convoy_stream_clients",
                "Current number of connected stream clients"
            )
            .map_err(register_failed("stream_clients"))?,

            stream_events_dropped_total: register_counter!(
                "convoy_stream_events_dropped_total",
                "Events evicted from client buffers before delivery"
            )
            .map_err(register_failed("stream_events_dropped_total"))?,

            stream_backpressure_signals_total: register_counter!(
                "convoy_stream_backpressure_signals_total",
                "Times a client buffer crossed its backpressure threshold"
            )
            .map_err(register_failed("stream_backpressure_signals_total"))?,

            reservations_granted_total: register_counter_vec!(
                "convoy_reservations_granted_total",
                "Total leases granted",
                &["mode"]
            )
            .map_err(register_failed("reservations_granted_total"))?,

            reservation_conflicts_total: register_counter!(
                "convoy_reservation_conflicts_total",
                "Total contested paths returned by reserve"
            )
            .map_err(register_failed("reservation_conflicts_total"))?,

            projection_rebuilds_total: register_counter_vec!(
                "convoy_projection_rebuilds_total",
                "Projection rebuilds by outcome",
                &["outcome"]
            )
            .map_err(register_failed("projection_rebuilds_total"))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, status_str.as_str()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn record_event_appended(&self, event_type: &str) {
        self.events_appended_total
            .with_label_values(&[event_type])
            .inc();
    }

    pub fn stream_connected(&self) {
        self.stream_clients.inc();
    }

    pub fn stream_disconnected(&self) {
        self.stream_clients.dec();
    }

    pub fn record_events_dropped(&self, count: u64) {
        self.stream_events_dropped_total.inc_by(count as f64);
    }

    pub fn record_backpressure(&self) {
        self.stream_backpressure_signals_total.inc();
    }

    pub fn record_reservations(&self, mode: &str, granted: usize, conflicts: usize) {
        self.reservations_granted_total
            .with_label_values(&[mode])
            .inc_by(granted as f64);
        self.reservation_conflicts_total.inc_by(conflicts as f64);
    }

    pub fn record_rebuild(&self, outcome: &str) {
        self.projection_rebuilds_total
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Run `f` against the global metrics if they registered.
///
/// Recording is a no-op when registration failed; `main` reports that
/// failure at startup.
pub fn with_metrics(f: impl FnOnce(&ConvoyMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
