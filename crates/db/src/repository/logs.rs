//! Node execution log — the append-only audit trail.
//!
//! An entry is appended as `running` before the node's side effects run and
//! finalized exactly once afterwards.  Nothing here deletes entries.

use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{encode_ts, NodeLogRecord, NodeLogRow, NodeStatus},
};

/// Identity of the node being visited.
#[derive(Debug, Clone)]
pub struct NewLog<'a> {
    pub execution_id: Uuid,
    pub node_id: &'a str,
    pub node_type: &'a str,
    pub label: &'a str,
}

/// Append a `running` entry and return its id.
pub async fn append_log(pool: &SqlitePool, new: NewLog<'_>) -> Result<i64, DbError> {
    let result = sqlx::query(
        r#"
        INSERT INTO node_execution_logs (execution_id, node_id, node_type, label, status, started_at)
        VALUES (?, ?, ?, ?, 'running', ?)
        "#,
    )
    .bind(new.execution_id.to_string())
    .bind(new.node_id)
    .bind(new.node_type)
    .bind(new.label)
    .bind(encode_ts(Utc::now()))
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Finalize a `running` entry.  Returns `false` if it was already final.
pub async fn finish_log(
    pool: &SqlitePool,
    id: i64,
    status: NodeStatus,
    output: Option<&Value>,
    error: Option<&str>,
) -> Result<bool, DbError> {
    let output = output.map(serde_json::to_string).transpose()?;
    let done = sqlx::query(
        r#"
        UPDATE node_execution_logs
        SET status = ?, completed_at = ?, output = ?, error = ?
        WHERE id = ? AND status = 'running'
        "#,
    )
    .bind(status.as_str())
    .bind(encode_ts(Utc::now()))
    .bind(output)
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Latest still-`running` entry for a node, if any.
pub async fn open_log_for(
    pool: &SqlitePool,
    execution_id: Uuid,
    node_id: &str,
) -> Result<Option<i64>, DbError> {
    let id = sqlx::query_scalar(
        r#"
        SELECT id FROM node_execution_logs
        WHERE execution_id = ? AND node_id = ? AND status = 'running'
        ORDER BY id DESC LIMIT 1
        "#,
    )
    .bind(execution_id.to_string())
    .bind(node_id)
    .fetch_optional(pool)
    .await?;

    Ok(id)
}

/// Every entry for one execution in visit order.
pub async fn list_logs(pool: &SqlitePool, execution_id: Uuid) -> Result<Vec<NodeLogRecord>, DbError> {
    let rows: Vec<NodeLogRow> = sqlx::query_as(
        r#"
        SELECT id, execution_id, node_id, node_type, label, status, started_at,
               completed_at, output, error
        FROM node_execution_logs
        WHERE execution_id = ?
        ORDER BY id
        "#,
    )
    .bind(execution_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}
