use axum::{http::StatusCode, Json, response::IntoResponse};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Coursepay API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Payments, refunds and instructor payouts for the course marketplace",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "api": "/api",
            "webhooks": "/webhooks/:gateway"
        }
    }))
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
