use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::metrics;
use crate::services::AppState;

pub mod content;

const DEFAULT_METRICS_AUTH: &str = "admin:changeme";

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let levels = state.catalog.levels.len();
    let chapters = state.catalog.chapters().count();
    let normalization = &state.normalizer_stats;

    // An empty catalog means the data directory was wrong, not that the
    // process is down.
    let (status_code, status) = if chapters == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "elearning-api",
            "version": env!("CARGO_PKG_VERSION"),
            "content": {
                "levels": levels,
                "chapters": chapters,
                "exercisesNormalized": normalization.normalized,
                "normalizationErrors": normalization.errors.len()
            }
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// `user:password` carried by a Basic `Authorization` header.
fn basic_credentials(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(decoded).ok()
}

/// Protects /metrics with HTTP Basic auth against `METRICS_AUTH`.
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let credentials = basic_credentials(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let expected =
        std::env::var("METRICS_AUTH").unwrap_or_else(|_| DEFAULT_METRICS_AUTH.to_string());

    if credentials != expected {
        tracing::warn!("Rejected /metrics request with invalid credentials");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
