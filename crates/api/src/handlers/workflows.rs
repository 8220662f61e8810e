use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use db::repository::workflows as wf_repo;
use db::WorkflowRecord;
use engine::WorkflowDefinition;

use crate::{ApiError, AppState};

/// Validate and store a definition.  A definition the validator rejects is
/// answered with `422` and nothing is stored.
pub async fn create(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> Result<(StatusCode, Json<WorkflowRecord>), ApiError> {
    let record = state.executor.save_definition(&definition).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WorkflowRecord>>, ApiError> {
    Ok(Json(wf_repo::list_workflows(state.executor.pool()).await?))
}

pub async fn get(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<WorkflowRecord>, ApiError> {
    match wf_repo::latest_workflow(state.executor.pool(), &id).await {
        Ok(record) => Ok(Json(record)),
        Err(db::DbError::NotFound) => Err(ApiError::NotFound(format!("workflow '{id}' not found"))),
        Err(e) => Err(e.into()),
    }
}
