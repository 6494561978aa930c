pub mod evaluations;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/upload", post(evaluations::handle_upload))
        .route("/evaluate", post(evaluations::handle_evaluate))
        .route("/result/:id", get(evaluations::handle_result))
        .with_state(state)
}
