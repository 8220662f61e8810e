use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use db::repository::{executions as exec_repo, logs as log_repo, tickets as ticket_repo};
use db::{ExecutionFilter, ExecutionRecord, ExecutionStatus, NodeLogRecord, WaitTicketRecord};
use engine::EngineError;

use crate::{ApiError, AppState};

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteWorkflowDto {
    /// Trigger node to fire; the first manual trigger if omitted.
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub input: Value,
}

/// Row of the monitoring list.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: i64,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub current_node_id: Option<String>,
    pub error: Option<String>,
}

impl From<ExecutionRecord> for ExecutionSummary {
    fn from(exec: ExecutionRecord) -> Self {
        Self {
            duration_ms: exec.duration().map(|d| d.num_milliseconds()),
            id: exec.id,
            workflow_id: exec.workflow_id,
            workflow_version: exec.workflow_version,
            status: exec.status,
            started_at: exec.started_at,
            completed_at: exec.completed_at,
            current_node_id: exec.current_node_id,
            error: exec.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: ExecutionRecord,
    pub duration_ms: Option<i64>,
    /// What the execution is waiting for, while it is `waiting`.
    pub wait: Option<WaitTicketRecord>,
}

/// Fire the workflow's manual trigger.
pub async fn execute(
    Path(id): Path<String>,
    State(state): State<AppState>,
    payload: Option<Json<ExecuteWorkflowDto>>,
) -> Result<(StatusCode, Json<ExecutionSummary>), ApiError> {
    let dto = payload.map(|Json(dto)| dto).unwrap_or_default();
    let exec = state.executor.fire_manual(&id, dto.trigger.as_deref(), dto.input).await?;
    state.workers.spawn_run(exec.id);
    Ok((StatusCode::ACCEPTED, Json(exec.into())))
}

pub async fn list(
    Query(filter): Query<ExecutionFilter>,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExecutionSummary>>, ApiError> {
    let executions = exec_repo::list_executions(state.executor.pool(), &filter).await?;
    Ok(Json(executions.into_iter().map(Into::into).collect()))
}

pub async fn get(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<ExecutionDetail>, ApiError> {
    let pool = state.executor.pool();
    let execution = exec_repo::get_execution(pool, id).await.map_err(|e| match e {
        db::DbError::NotFound => ApiError::from(EngineError::ExecutionNotFound(id)),
        other => other.into(),
    })?;
    let wait = match execution.status {
        ExecutionStatus::Waiting => ticket_repo::get_ticket(pool, id).await?,
        _ => None,
    };
    Ok(Json(ExecutionDetail {
        duration_ms: execution.duration().map(|d| d.num_milliseconds()),
        execution,
        wait,
    }))
}

/// Ordered audit trail of one execution.
pub async fn logs(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Vec<NodeLogRecord>>, ApiError> {
    let pool = state.executor.pool();
    if let Err(db::DbError::NotFound) = exec_repo::current_status(pool, id).await {
        return Err(EngineError::ExecutionNotFound(id).into());
    }
    Ok(Json(log_repo::list_logs(pool, id).await?))
}

pub async fn pause(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.executor.pause(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Un-pause and hand the execution back to the worker pool.
pub async fn resume(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.executor.resume_paused(id).await?;
    state.workers.spawn_run(id);
    Ok(StatusCode::ACCEPTED)
}

pub async fn cancel(Path(id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.executor.cancel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
