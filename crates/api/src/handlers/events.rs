use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct EventAccepted {
    pub event: String,
    pub executions: Vec<Uuid>,
}

/// Publish a named event.  Every workflow listening for it gets a new
/// execution; none listening is not an error.
pub async fn fire(
    Path(name): Path<String>,
    State(state): State<AppState>,
    payload: Option<Json<Value>>,
) -> Result<(StatusCode, Json<EventAccepted>), ApiError> {
    let payload = payload.map(|Json(v)| v).unwrap_or(Value::Null);
    let started = state.executor.fire_event(&name, payload).await?;

    let executions = started
        .into_iter()
        .map(|exec| {
            state.workers.spawn_run(exec.id);
            exec.id
        })
        .collect();

    Ok((StatusCode::ACCEPTED, Json(EventAccepted { event: name, executions })))
}
