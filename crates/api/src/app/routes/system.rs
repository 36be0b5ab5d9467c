use std::sync::Arc;

use axum::{extract::Extension, response::IntoResponse, Json};
use chrono::Utc;

use crate::app::dto::StatusResponse;
use crate::app::services::{IntakeService, SERVICE_NAME};

pub async fn info() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "process": "POST /process",
            "result": "GET /result/{task_id}",
            "status": "GET /status",
        },
    }))
}

pub async fn status(Extension(intake): Extension<Arc<IntakeService>>) -> Json<StatusResponse> {
    let health = intake.health().await;
    Json(StatusResponse {
        service: SERVICE_NAME,
        status: if health.queue_connected { "healthy" } else { "unhealthy" },
        queue_connected: health.queue_connected,
        queue_size: health.queue_size,
        timestamp: Utc::now(),
    })
}
