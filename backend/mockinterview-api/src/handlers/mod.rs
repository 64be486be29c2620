use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::metrics;
use crate::services::AppState;

pub mod error;
pub mod mock_interview;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut dependencies = Map::new();

    let store_health = dependency_status(
        state.store.ping().await.map_err(|e| e.to_string()),
        "Session store reachable",
    );
    let cache_health = dependency_status(
        state.cache.ping().await.map_err(|e| e.to_string()),
        "Session cache reachable",
    );

    let all_healthy = [&store_health, &cache_health]
        .iter()
        .all(|dep| dep.get("status").and_then(Value::as_str) == Some("healthy"));

    dependencies.insert("store".to_string(), Value::Object(store_health));
    dependencies.insert("cache".to_string(), Value::Object(cache_health));

    let (status_code, status) = if all_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "mockinterview-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": dependencies
        })),
    )
}

fn dependency_status(result: Result<(), String>, ok_message: &str) -> Map<String, Value> {
    let mut status = Map::new();
    match result {
        Ok(()) => {
            status.insert("status".to_string(), json!("healthy"));
            status.insert("message".to_string(), json!(ok_message));
        }
        Err(e) => {
            status.insert("status".to_string(), json!("unhealthy"));
            status.insert("error".to_string(), json!(e));
        }
    }
    status
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

/// Protects /metrics with HTTP Basic auth; credentials come from `METRICS_AUTH` (`user:password`).
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());
    if credentials != expected {
        tracing::warn!("Rejected /metrics request with invalid credentials");
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}
