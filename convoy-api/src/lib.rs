//! CONVOY API - REST and SSE layer
//!
//! Exposes the coordination store over HTTP: project logs, agents,
//! messaging, file reservations, bead dependencies and a durable
//! server-sent-events stream that clients resume with `Last-Event-ID`.
//!
//! All state lives in the event log; the handlers here only validate input,
//! call into `convoy-storage` and map errors to HTTP responses.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod stream;
pub mod telemetry;
pub mod types;

use std::sync::Arc;

use convoy_core::{Clock, StreamConfig};
use convoy_events::EventLog;
use convoy_storage::{ProjectRegistry, RegistryConfig};

// Re-export commonly used types
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use routes::create_api_router;
pub use state::AppState;
pub use stream::{StreamClient, StreamHub};
pub use types::*;

/// Open a registry over `log` and wire it to a stream hub.
///
/// # Errors
///
/// Fails when any configuration is invalid or the log cannot be replayed.
pub async fn build_state(
    log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
    registry_config: RegistryConfig,
    stream_config: StreamConfig,
    api_config: ApiConfig,
) -> ApiResult<AppState> {
    let registry = Arc::new(ProjectRegistry::open(log, clock, registry_config).await?);
    let hub = Arc::new(StreamHub::new(Arc::clone(&registry), stream_config)?);
    Ok(AppState::new(registry, hub, api_config))
}
