use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::app::services::IntakeService;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/process", post(process))
        .route("/result/:task_id", get(result))
}

pub async fn process(
    Extension(intake): Extension<Arc<IntakeService>>,
    body: Result<Json<dto::ProcessRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(reason = %rejection.body_text(), "submission rejected");
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "validation_error",
                rejection.body_text(),
            );
        }
    };

    match intake.submit(body.into()).await {
        Ok(admission) => (
            StatusCode::ACCEPTED,
            Json(dto::ProcessAccepted::from(admission)),
        )
            .into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}

pub async fn result(
    Extension(intake): Extension<Arc<IntakeService>>,
    Path(task_id): Path<String>,
) -> axum::response::Response {
    match intake.query(&task_id).await {
        Ok(Some(view)) => Json(view).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(dto::NotFound {
                task_id: &task_id,
                status: "not_found",
            }),
        )
            .into_response(),
        Err(e) => errors::intake_error_to_response(e),
    }
}
