//! Scheduler error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("engine error: {0}")]
    Engine(#[from] engine::EngineError),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    /// A worker task panicked or was aborted.
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}
