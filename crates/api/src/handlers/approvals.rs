use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use db::WaitTicketRecord;

use crate::{ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct ApprovalDto {
    pub approved: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Record the decision on an outstanding approval.  The scheduler resumes
/// the execution on its next poll.
pub async fn decide(
    Path(token): Path<String>,
    State(state): State<AppState>,
    Json(dto): Json<ApprovalDto>,
) -> Result<Json<WaitTicketRecord>, ApiError> {
    let ticket = state.executor.approve(&token, dto.approved, dto.comment).await?;
    Ok(Json(ticket))
}
