//! CONVOY API Server Entry Point
//!
//! Opens the event log (LMDB when `CONVOY_DATA_DIR` is set, in-memory
//! otherwise), replays every project and starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use convoy_api::telemetry::{init_tracer, TelemetryConfig, METRICS};
use convoy_api::{build_state, create_api_router, ApiConfig, ApiError, ApiResult};
use convoy_core::{StoreConfig, StreamConfig, SystemClock};
use convoy_events::{EventLog, InMemoryEventLog, LmdbEventLog};
use convoy_storage::RegistryConfig;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracer(&telemetry_config)?;

    if let Err(e) = &*METRICS {
        tracing::error!(error = %e.message, "Prometheus metrics unavailable");
    }

    let registry_config = RegistryConfig::from_env();
    let log = open_log(&registry_config.store)?;

    let state = build_state(
        log,
        Arc::new(SystemClock),
        registry_config,
        StreamConfig::from_env(),
        ApiConfig::from_env(),
    )
    .await?;
    let registry = Arc::clone(&state.registry);
    let hub = Arc::clone(&state.hub);

    tracing::info!(
        projects = registry.project_keys().len(),
        "Event log replayed"
    );

    let app: Router = create_api_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting CONVOY API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    hub.shutdown();
    registry.close();
    Ok(())
}

fn open_log(store: &StoreConfig) -> ApiResult<Arc<dyn EventLog>> {
    match &store.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                ApiError::storage_error(format!(
                    "Failed to create data directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let log = LmdbEventLog::open(dir, store.lmdb_map_size_mb)
                .map_err(|e| ApiError::storage_error(format!("Failed to open event log: {}", e)))?;
            tracing::info!(data_dir = %dir.display(), "Using LMDB event log");
            Ok(Arc::new(log))
        }
        None => {
            tracing::warn!("CONVOY_DATA_DIR not set; events are kept in memory only");
            Ok(Arc::new(InMemoryEventLog::new()))
        }
    }
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("CONVOY_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("CONVOY_API_PORT").ok())
        .unwrap_or_else(|| "8765".to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
