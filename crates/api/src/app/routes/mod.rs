use axum::{routing::get, Router};

pub mod system;
pub mod tasks;

/// Router for every intake endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/", get(system::info))
        .route("/status", get(system::status))
        .merge(tasks::router())
}
