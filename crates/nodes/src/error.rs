//! Node-level error type.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by an action handler.
///
/// Any of these terminates the execution; the engine never retries.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    /// Parameters did not match the action's expected shape.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// The collaborator understood the request and refused it.
    #[error("{collaborator} rejected the request: {message}")]
    Rejected {
        collaborator: &'static str,
        message: String,
    },

    /// Network or I/O failure reaching the collaborator.
    #[error("transport error: {0}")]
    Transport(String),

    /// The handler exceeded its per-action time bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The engine is shutting down and abandoned the call.
    #[error("cancelled")]
    Cancelled,
}
