//! Typed error type for the db crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("row not found")]
    NotFound,

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A uniqueness rule was violated (e.g. re-saving an existing workflow version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored value could not be decoded into its typed form.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
