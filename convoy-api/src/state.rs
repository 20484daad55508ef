//! Shared application state for Axum routers.

use std::sync::Arc;

use axum::extract::FromRef;
use convoy_storage::{ProjectHandle, ProjectRegistry};

use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::stream::StreamHub;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ProjectRegistry>,
    pub hub: Arc<StreamHub>,
    pub config: ApiConfig,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(registry: Arc<ProjectRegistry>, hub: Arc<StreamHub>, config: ApiConfig) -> Self {
        Self {
            registry,
            hub,
            config,
            start_time: std::time::Instant::now(),
        }
    }

    /// Resolve the `:project` path segment.
    pub async fn project(&self, slug: &str) -> ApiResult<Arc<ProjectHandle>> {
        Ok(self.registry.project(slug).await?)
    }
}

impl FromRef<AppState> for Arc<ProjectRegistry> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.registry)
    }
}

impl FromRef<AppState> for Arc<StreamHub> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.hub)
    }
}
