//! HTTP request handlers.

use crate::response::ApiError;
use crate::server::AppState;
use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Header reporting whether the body comes from the cache.
pub const X_CACHE: &str = "x-cache";

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Serve `url` slowly over `rate` seconds.
pub async fn handle_fetch(
    State(state): State<Arc<AppState>>,
    Path((rate, url)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let rate: u64 = rate.parse().map_err(|_| ApiError::bad_rate(&rate))?;
    let url = target_url(&url, query.as_deref());
    debug!("Fetch {} over {}s", url, rate);

    let throttled = state.throttler.handle(rate, &url).await?;

    let content_type = HeaderValue::from_str(&throttled.mimetype)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, throttled.length)
        .header(X_CACHE, throttled.cache.as_str())
        .body(Body::from_stream(throttled.body))
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

/// Rebuild the target URL from the wildcard path and the request query.
fn target_url(path: &str, query: Option<&str>) -> String {
    match query {
        Some(query) if !query.is_empty() => format!("{}?{}", path, query),
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_url_appends_query() {
        assert_eq!(
            target_url("http://example.test/f", Some("a=1&b=2")),
            "http://example.test/f?a=1&b=2"
        );
        assert_eq!(target_url("http://example.test/f", Some("")), "http://example.test/f");
        assert_eq!(target_url("http://example.test/f", None), "http://example.test/f");
    }
}
