//! Workflow definition storage.  Definitions are insert-only.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    DbError,
    models::{encode_ts, WorkflowRecord, WorkflowRow},
};

const COLUMNS: &str = "id, version, name, definition, created_at";

/// Store a new workflow version.
///
/// Returns `DbError::Conflict` if this `(id, version)` already exists: a
/// definition is immutable once stored, changes require a new version.
pub async fn save_workflow(
    pool: &SqlitePool,
    id: &str,
    version: i64,
    name: &str,
    definition: &serde_json::Value,
) -> Result<WorkflowRecord, DbError> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO workflows (id, version, name, definition, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(version)
    .bind(name)
    .bind(serde_json::to_string(definition)?)
    .bind(encode_ts(now))
    .execute(pool)
    .await;

    match result {
        Ok(_) => get_workflow(pool, id, version).await,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(DbError::Conflict(
            format!("workflow '{id}' version {version} already exists"),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Fetch one exact workflow version.
pub async fn get_workflow(
    pool: &SqlitePool,
    id: &str,
    version: i64,
) -> Result<WorkflowRecord, DbError> {
    let row: WorkflowRow = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE id = ? AND version = ?"
    ))
    .bind(id)
    .bind(version)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    row.try_into()
}

/// Fetch the highest version of a workflow.
pub async fn latest_workflow(pool: &SqlitePool, id: &str) -> Result<WorkflowRecord, DbError> {
    let row: WorkflowRow = sqlx::query_as(&format!(
        "SELECT {COLUMNS} FROM workflows WHERE id = ? ORDER BY version DESC LIMIT 1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    row.try_into()
}

/// Return the latest version of every workflow, ordered by id.
pub async fn list_workflows(pool: &SqlitePool) -> Result<Vec<WorkflowRecord>, DbError> {
    let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
        r#"
        SELECT {COLUMNS} FROM workflows w
        WHERE version = (SELECT MAX(version) FROM workflows WHERE id = w.id)
        ORDER BY id
        "#
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}
