//! Mapping of engine errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use engine::EngineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("{0}")]
    NotFound(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Engine(e) => match e {
                EngineError::Validation(_)
                | EngineError::MalformedDefinition(_)
                | EngineError::ReservedContextKey { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                EngineError::WorkflowNotFound(_)
                | EngineError::ExecutionNotFound(_)
                | EngineError::UnknownApproval(_) => StatusCode::NOT_FOUND,
                EngineError::NoMatchingTrigger { .. } => StatusCode::BAD_REQUEST,
                EngineError::InvalidTransition { .. }
                | EngineError::AlreadyRunning(_)
                | EngineError::ClaimConflict(_)
                | EngineError::TicketNotDue(_) => StatusCode::CONFLICT,
                EngineError::Database(db::DbError::Conflict(_)) => StatusCode::CONFLICT,
                EngineError::UnknownNode { .. } | EngineError::Database(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Database(db::DbError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
