pub mod broker;
pub mod predict;
pub mod random;

use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// All HTTP routes of the prediction service.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/health", get(health))
        .route("/predict", post(predict::predict))
        .route("/predict_random_repos", get(random::predict_random_repos))
        .route("/broker/tasks/claim", post(broker::claim_task))
        .route("/broker/tasks/{id}/result", post(broker::submit_result))
        .with_state(state)
}

async fn serve_index() -> Html<&'static str> {
    Html(include_str!("../../static/index.html"))
}

async fn health() -> &'static str {
    "ok"
}
