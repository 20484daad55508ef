//! CONVOY Telemetry - Observability Infrastructure
//!
//! Structured tracing and Prometheus metrics for the API layer and the
//! stream server. Everything works standalone without external collectors.

pub mod metrics;
pub mod middleware;
pub mod tracer;

pub use metrics::{metrics_handler, with_metrics, ConvoyMetrics, METRICS};
pub use middleware::observability_middleware;
pub use tracer::{init_tracer, LogFormat, TelemetryConfig};
