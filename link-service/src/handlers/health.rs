use axum::{Json, extract::State, http::StatusCode};

use crate::AppState;

/// GET /health
///
/// Always 200: the cache degrading to pass-through does not stop any
/// linking flow, so a degraded instance stays in rotation. The body says
/// which state it is in.
pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache_status = match state.cache.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "Cache health check failed");
            "down"
        }
    };

    Json(serde_json::json!({
        "status": "healthy",
        "service": "link-service",
        "checks": {
            "cache": cache_status,
        }
    }))
}

/// GET /ready
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}
