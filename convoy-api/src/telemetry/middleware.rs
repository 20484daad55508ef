//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Wraps every request in a tracing span and records Prometheus metrics
//! under a normalized route label.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::with_metrics;

/// Path rewrites applied in order. Each one replaces a caller-chosen
/// segment with a placeholder so metric labels stay low-cardinality.
static PATH_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"^/api/v1/projects/[^/]+", "/api/v1/projects/{project}"),
        (r"/agents/[^/]+", "/agents/{name}"),
        (r"/threads/[^/]+", "/threads/{thread_id}"),
        (r"/beads/[^/]+", "/beads/{id}"),
        (r"/\d+(/|$)", "/{id}$1"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| match Regex::new(pattern) {
        Ok(re) => Some((re, replacement)),
        Err(e) => {
            tracing::error!(pattern, error = %e, "invalid path normalization rule");
            None
        }
    })
    .collect()
});

/// Normalize path for metrics/spans (replace slugs, names and ids with
/// placeholders).
pub(crate) fn normalize_path(path: &str) -> String {
    PATH_RULES
        .iter()
        .fold(path.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// Observability middleware for Axum.
pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    with_metrics(|m| {
        m.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        )
    });

    if status.is_server_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_project_and_agent() {
        let path = "/api/v1/projects/_work_backend/agents/BlueLake/inbox";
        assert_eq!(
            normalize_path(path),
            "/api/v1/projects/{project}/agents/{name}/inbox"
        );
    }

    #[test]
    fn test_normalize_path_numeric_id() {
        let path = "/api/v1/projects/alpha/messages/12345/ack";
        assert_eq!(
            normalize_path(path),
            "/api/v1/projects/{project}/messages/{id}/ack"
        );
    }

    #[test]
    fn test_normalize_path_thread_and_bead() {
        assert_eq!(
            normalize_path("/api/v1/projects/alpha/threads/bd-12"),
            "/api/v1/projects/{project}/threads/{thread_id}"
        );
        assert_eq!(
            normalize_path("/api/v1/projects/alpha/beads/bd-12/blocked-by"),
            "/api/v1/projects/{project}/beads/{id}/blocked-by"
        );
    }

    #[test]
    fn test_normalize_path_collection_routes_untouched() {
        assert_eq!(
            normalize_path("/api/v1/projects/alpha/agents"),
            "/api/v1/projects/{project}/agents"
        );
        assert_eq!(normalize_path("/api/v1/projects"), "/api/v1/projects");
    }

    #[test]
    fn test_normalize_path_health() {
        assert_eq!(normalize_path("/health/ready"), "/health/ready");
    }
}
