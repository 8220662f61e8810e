//! Wait ticket queries.  Tickets are created and claimed inside the
//! execution transactions in [`super::executions`]; this module only reads
//! them and records approval decisions.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{encode_ts, ApprovalDecision, WaitTicketRecord, WaitTicketRow},
};

const COLUMNS: &str =
    "execution_id, node_id, wait_type, resolved_at, approval_token, decision, created_at";

/// Tickets whose wake condition holds at `now`, oldest first.
pub async fn due_tickets(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<WaitTicketRecord>, DbError> {
    let rows: Vec<WaitTicketRow> = sqlx::query_as(&format!(
        r#"
        SELECT {COLUMNS} FROM wait_tickets
        WHERE (resolved_at IS NOT NULL AND resolved_at <= ?) OR decision IS NOT NULL
        ORDER BY created_at
        LIMIT ?
        "#
    ))
    .bind(encode_ts(now))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// The ticket of one execution, if it is waiting.
pub async fn get_ticket(
    pool: &SqlitePool,
    execution_id: Uuid,
) -> Result<Option<WaitTicketRecord>, DbError> {
    let row: Option<WaitTicketRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM wait_tickets WHERE execution_id = ?"))
            .bind(execution_id.to_string())
            .fetch_optional(pool)
            .await?;

    row.map(TryInto::try_into).transpose()
}

/// Look up an approval ticket by its token.
pub async fn ticket_by_token(
    pool: &SqlitePool,
    token: &str,
) -> Result<Option<WaitTicketRecord>, DbError> {
    let row: Option<WaitTicketRow> =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM wait_tickets WHERE approval_token = ?"))
            .bind(token)
            .fetch_optional(pool)
            .await?;

    row.map(TryInto::try_into).transpose()
}

/// Record the decision on an outstanding approval.  Only the first decision
/// counts; returns `false` if the token is unknown or already decided.
pub async fn decide_approval(
    pool: &SqlitePool,
    token: &str,
    decision: &ApprovalDecision,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "UPDATE wait_tickets SET decision = ? WHERE approval_token = ? AND decision IS NULL",
    )
    .bind(serde_json::to_string(decision)?)
    .bind(token)
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}
