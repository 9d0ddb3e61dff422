use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::broker::TaskOutcome;
use crate::state::AppState;

/// POST /broker/tasks/claim - Long-poll for the next task (204 when idle)
pub async fn claim_task(State(state): State<AppState>) -> Response {
    match state.broker.next_task(state.claim_poll()).await {
        Some(task) => {
            tracing::info!(task_id = %task.id, "Task claimed by remote worker");
            Json(task).into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// POST /broker/tasks/{id}/result - Deliver a remote worker's outcome
pub async fn submit_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(outcome): Json<TaskOutcome>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .broker
        .complete(id, outcome)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
