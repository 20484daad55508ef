//! REST API Routes Module
//!
//! Axum routers for every CONVOY resource. Each submodule exposes a
//! `create_router` that is merged under `/api/v1/projects`; the project slug
//! is always the first path segment.
//!
//! # Route Organization
//!
//! - `/api/v1/projects` - Project registration and raw event log access
//! - `/api/v1/projects/:project/agents` - Agent registry and inboxes
//! - `/api/v1/projects/:project/messages` - Messaging and receipts
//! - `/api/v1/projects/:project/reservations` - File reservation leases
//! - `/api/v1/projects/:project/beads` - Bead dependency queries
//! - `/api/v1/projects/:project/stream` - Durable SSE event stream
//! - `/health` - Health checks
//! - `/metrics` - Prometheus metrics

pub mod agent;
pub mod bead;
pub mod health;
pub mod message;
pub mod project;
pub mod projection;
pub mod reservation;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::state::AppState;
use crate::stream::sse;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Build the CORS layer from configuration.
///
/// With no configured origins every origin is allowed (development mode).
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static("last-event-id"),
        ])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

/// Routes mounted under `/api/v1/projects`, without layers.
fn project_routes(state: &AppState) -> Router {
    Router::new()
        .merge(project::create_router(state.clone()))
        .merge(agent::create_router(state.clone()))
        .merge(message::create_router(state.clone()))
        .merge(reservation::create_router(state.clone()))
        .merge(bead::create_router(state.clone()))
        .merge(projection::create_router(state.clone()))
        .merge(sse::create_router(Arc::clone(&state.hub)))
}

/// Create the complete API router.
///
/// Layers, outermost first: CORS, HTTP tracing, then the observability
/// middleware that records metrics per normalized path.
pub fn create_api_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);

    Router::new()
        .nest("/api/v1/projects", project_routes(&state))
        .nest("/health", health::create_router(state))
        .route("/metrics", get(metrics_handler))
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_builds_for_configured_origins() {
        let config = ApiConfig {
            cors_origins: vec!["https://convoy.example.com".to_string()],
            cors_allow_credentials: true,
            ..ApiConfig::default()
        };
        let _layer = build_cors_layer(&config);
    }

    #[test]
    fn test_cors_layer_builds_for_development() {
        let _layer = build_cors_layer(&ApiConfig::default());
    }
}
