//! SSE encoding and the stream route.
//!
//! Wire shape:
//! - `: connected` comment first;
//! - `id: <offset>` + `data: <event json>` per event;
//! - `event: dropped` + `data: {"dropped":n,"last_delivered":k}` after
//!   evictions.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::sse::{self, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use convoy_core::{Offset, TransportError};
use futures_util::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use super::hub::{HubStats, StreamHub};
use super::sink::{Frame, SseItem, SseSink};
use crate::error::{ApiError, ApiResult};

const LAST_EVENT_ID: &str = "last-event-id";

/// Turn a frame into an SSE event.
///
/// # Errors
///
/// Returns `TransportError::SendFailed` if the event cannot be serialized.
pub fn encode_frame(frame: Frame<'_>) -> Result<sse::Event, TransportError> {
    let send_failed = |e: serde_json::Error| TransportError::SendFailed {
        reason: format!("failed to encode frame: {e}"),
    };
    match frame {
        Frame::Connected { .. } => Ok(sse::Event::default().comment("connected")),
        Frame::Event(event) => {
            let data = serde_json::to_string(event).map_err(send_failed)?;
            Ok(sse::Event::default()
                .id(event.offset.to_string())
                .data(data))
        }
        Frame::Dropped {
            dropped_total,
            last_delivered,
        } => {
            let data = serde_json::to_string(&serde_json::json!({
                "dropped": dropped_total,
                "last_delivered": last_delivered,
            }))
            .map_err(send_failed)?;
            Ok(sse::Event::default().event("dropped").data(data))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamParams {
    pub cursor: Option<Offset>,
}

/// Resume point of a connection. `Last-Event-ID` wins over `?cursor=`;
/// neither means the client starts at the beginning.
pub fn resolve_cursor(headers: &HeaderMap, query: Option<Offset>) -> ApiResult<Offset> {
    match headers.get(LAST_EVENT_ID) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<Offset>().ok())
            .ok_or_else(|| ApiError::invalid_format("Last-Event-ID", "a non-negative offset")),
        None => Ok(query.unwrap_or(0)),
    }
}

/// GET /api/v1/projects/:project/stream
pub async fn stream_events(
    State(hub): State<Arc<StreamHub>>,
    Path(project): Path<String>,
    Query(params): Query<StreamParams>,
    headers: HeaderMap,
) -> ApiResult<Sse<impl Stream<Item = SseItem>>> {
    let cursor = resolve_cursor(&headers, params.cursor)?;
    let (sink, rx) = SseSink::channel(hub.config().transport_capacity);
    let client = hub.connect(&project, cursor, Arc::new(sink)).await?;
    tracing::info!(project_key = %project, client_id = client.id(), cursor, "SSE client connected");

    Ok(Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(hub.config().keep_alive)))
}

/// GET /api/v1/projects/:project/stream/stats
pub async fn stream_stats(
    State(hub): State<Arc<StreamHub>>,
    Path(project): Path<String>,
) -> ApiResult<Json<HubStats>> {
    Ok(Json(hub.stats(Some(&project))))
}

pub fn create_router(hub: Arc<StreamHub>) -> Router {
    Router::new()
        .route("/:project/stream", get(stream_events))
        .route("/:project/stream/stats", get(stream_stats))
        .with_state(hub)
}
