//! Execution repository functions.
//!
//! Status changes are compare-and-set: each `UPDATE` names the status the
//! caller expects the row to be in, and the function reports whether the
//! row matched.  Writes from the run loop also name the lease owner, so an
//! executor that lost its lease (to another process sharing the database)
//! cannot advance the execution any further.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{encode_ts, ExecutionFilter, ExecutionRecord, ExecutionRow, ExecutionStatus},
};

const COLUMNS: &str = "id, workflow_id, workflow_version, trigger_node_id, status, started_at, \
                       completed_at, current_node_id, context, result, error";

/// Everything needed to create an execution when a trigger fires.
#[derive(Debug, Clone)]
pub struct NewExecution<'a> {
    pub workflow_id: &'a str,
    pub workflow_version: i64,
    pub trigger_node_id: &'a str,
    pub context: &'a Map<String, Value>,
}

/// Ticket data written together with the `Waiting` transition.
#[derive(Debug, Clone)]
pub enum NewWaitTicket<'a> {
    Timer { node_id: &'a str, resolved_at: DateTime<Utc> },
    Approval { node_id: &'a str, token: &'a str },
}

/// The writes that move a claimed execution past its wait node.
#[derive(Debug, Clone)]
pub struct ResumeClaim<'a> {
    pub execution_id: Uuid,
    /// The wait node's `Running` log entry, finalized as `Completed`.
    pub log_id: Option<i64>,
    pub wait_output: &'a Value,
    pub next_node_id: Option<&'a str>,
    pub context: &'a Map<String, Value>,
    pub now: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// reads
// ---------------------------------------------------------------------------

/// Create a new execution in `running` status, positioned on its trigger node.
pub async fn create_execution(
    pool: &SqlitePool,
    new: NewExecution<'_>,
) -> Result<ExecutionRecord, DbError> {
    let id = Uuid::new_v4();
    let now = encode_ts(Utc::now());

    sqlx::query(
        r#"
        INSERT INTO executions
            (id, workflow_id, workflow_version, trigger_node_id, status, started_at,
             current_node_id, context, updated_at)
        VALUES (?, ?, ?, ?, 'running', ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new.workflow_id)
    .bind(new.workflow_version)
    .bind(new.trigger_node_id)
    .bind(&now)
    .bind(new.trigger_node_id)
    .bind(serde_json::to_string(new.context)?)
    .bind(&now)
    .execute(pool)
    .await?;

    get_execution(pool, id).await
}

/// Fetch one execution by id.
pub async fn get_execution(pool: &SqlitePool, id: Uuid) -> Result<ExecutionRecord, DbError> {
    let row: ExecutionRow =
        sqlx::query_as(&format!("SELECT {COLUMNS} FROM executions WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(pool)
            .await?
            .ok_or(DbError::NotFound)?;

    row.try_into()
}

/// Read just the status; the engine calls this between node steps.
pub async fn current_status(pool: &SqlitePool, id: Uuid) -> Result<ExecutionStatus, DbError> {
    let status: String = sqlx::query_scalar("SELECT status FROM executions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)?;

    status.parse().map_err(DbError::Corrupt)
}

/// Monitoring query, newest first.
pub async fn list_executions(
    pool: &SqlitePool,
    filter: &ExecutionFilter,
) -> Result<Vec<ExecutionRecord>, DbError> {
    let status = filter.status.map(|s| s.as_str());
    let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
        r#"
        SELECT {COLUMNS} FROM executions
        WHERE (? IS NULL OR status = ?)
          AND (? IS NULL OR workflow_id = ?)
        ORDER BY started_at DESC, id
        LIMIT ?
        "#
    ))
    .bind(status)
    .bind(status)
    .bind(filter.workflow_id.as_deref())
    .bind(filter.workflow_id.as_deref())
    .bind(filter.limit.unwrap_or(-1))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// Executions left `running` that nobody holds a live lease on, oldest
/// first.  Only rows last written at or before `untouched_since` are
/// returned, so a run that was just created or just resumed is left to the
/// worker it was handed to.
pub async fn list_unleased(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    untouched_since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ExecutionRecord>, DbError> {
    let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
        r#"
        SELECT {COLUMNS} FROM executions
        WHERE status = 'running'
          AND (lease_owner IS NULL OR lease_expires_at <= ?)
          AND updated_at <= ?
        ORDER BY started_at, id
        LIMIT ?
        "#
    ))
    .bind(encode_ts(now))
    .bind(encode_ts(untouched_since))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

// ---------------------------------------------------------------------------
// run lease
// ---------------------------------------------------------------------------

/// Take or renew the run lease for `owner`.
///
/// Succeeds while the execution is `running` and the lease is free,
/// expired, or already held by `owner`.  A `false` return means the run must
/// stop: the execution left `running` or another executor owns it.
pub async fn acquire_lease(
    pool: &SqlitePool,
    id: Uuid,
    owner: Uuid,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<bool, DbError> {
    let owner = owner.to_string();
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET lease_owner = ?, lease_expires_at = ?
        WHERE id = ? AND status = 'running'
          AND (lease_owner IS NULL OR lease_owner = ? OR lease_expires_at <= ?)
        "#,
    )
    .bind(&owner)
    .bind(encode_ts(now + ttl))
    .bind(id.to_string())
    .bind(&owner)
    .bind(encode_ts(now))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Drop `owner`'s lease, if it still holds one.
pub async fn release_lease(pool: &SqlitePool, id: Uuid, owner: Uuid) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE executions SET lease_owner = NULL, lease_expires_at = NULL WHERE id = ? AND lease_owner = ?",
    )
    .bind(id.to_string())
    .bind(owner.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// writes (all compare-and-set)
// ---------------------------------------------------------------------------

/// Persist the cursor and context after a node step.  Applies while `owner`
/// holds the lease and the execution is `running`, or `paused` by a request
/// that arrived while the step was in flight.
pub async fn advance_execution(
    pool: &SqlitePool,
    id: Uuid,
    owner: Uuid,
    next_node_id: Option<&str>,
    context: &Map<String, Value>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE executions
        SET current_node_id = ?, context = ?, updated_at = ?
        WHERE id = ? AND status IN ('running', 'paused') AND lease_owner = ?
        "#,
    )
    .bind(next_node_id)
    .bind(serde_json::to_string(context)?)
    .bind(encode_ts(Utc::now()))
    .bind(id.to_string())
    .bind(owner.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `running → completed`, storing the final context snapshot as the result.
pub async fn complete_execution(
    pool: &SqlitePool,
    id: Uuid,
    owner: Uuid,
    result: &Value,
) -> Result<bool, DbError> {
    let now = encode_ts(Utc::now());
    let done = sqlx::query(
        r#"
        UPDATE executions
        SET status = 'completed', current_node_id = NULL, result = ?, completed_at = ?, updated_at = ?,
            lease_owner = NULL, lease_expires_at = NULL
        WHERE id = ? AND status = 'running' AND lease_owner = ?
        "#,
    )
    .bind(serde_json::to_string(result)?)
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .bind(owner.to_string())
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// `running → failed`, recording the error verbatim.  A pause that arrived
/// while the failing step was in flight does not hide the failure.
pub async fn fail_execution(
    pool: &SqlitePool,
    id: Uuid,
    owner: Uuid,
    error: &str,
) -> Result<bool, DbError> {
    let now = encode_ts(Utc::now());
    let done = sqlx::query(
        r#"
        UPDATE executions
        SET status = 'failed', error = ?, completed_at = ?, updated_at = ?,
            lease_owner = NULL, lease_expires_at = NULL
        WHERE id = ? AND status IN ('running', 'paused') AND lease_owner = ?
        "#,
    )
    .bind(error)
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .bind(owner.to_string())
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Generic `from → to` transition used for pause and un-pause.
pub async fn transition_status(
    pool: &SqlitePool,
    id: Uuid,
    from: ExecutionStatus,
    to: ExecutionStatus,
) -> Result<bool, DbError> {
    let done = sqlx::query(
        "UPDATE executions SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
    )
    .bind(to.as_str())
    .bind(encode_ts(Utc::now()))
    .bind(id.to_string())
    .bind(from.as_str())
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Move any non-terminal execution to `cancelled`.  A waiting execution
/// loses its ticket and its wait node's log entry is closed as `skipped`.
pub async fn cancel_execution(pool: &SqlitePool, id: Uuid) -> Result<bool, DbError> {
    let now = encode_ts(Utc::now());
    let mut tx = pool.begin().await?;

    let done = sqlx::query(
        r#"
        UPDATE executions
        SET status = 'cancelled', completed_at = ?, updated_at = ?
        WHERE id = ? AND status IN ('running', 'waiting', 'paused')
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    if done.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    // The wait node's entry would otherwise stay `running` forever.
    sqlx::query(
        r#"
        UPDATE node_execution_logs
        SET status = 'skipped', completed_at = ?
        WHERE execution_id = ? AND status = 'running'
          AND node_id IN (SELECT node_id FROM wait_tickets WHERE execution_id = ?)
        "#,
    )
    .bind(&now)
    .bind(id.to_string())
    .bind(id.to_string())
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM wait_tickets WHERE execution_id = ?")
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

/// `running → waiting` plus the wait ticket, in one transaction.  Releases
/// `owner`'s lease.
pub async fn suspend_execution(
    pool: &SqlitePool,
    id: Uuid,
    owner: Uuid,
    context: &Map<String, Value>,
    ticket: NewWaitTicket<'_>,
) -> Result<bool, DbError> {
    let now = encode_ts(Utc::now());
    let mut tx = pool.begin().await?;

    let done = sqlx::query(
        r#"
        UPDATE executions
        SET status = 'waiting', context = ?, updated_at = ?,
            lease_owner = NULL, lease_expires_at = NULL
        WHERE id = ? AND status = 'running' AND lease_owner = ?
        "#,
    )
    .bind(serde_json::to_string(context)?)
    .bind(&now)
    .bind(id.to_string())
    .bind(owner.to_string())
    .execute(&mut *tx)
    .await?;

    if done.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let (node_id, wait_type, resolved_at, token) = match ticket {
        NewWaitTicket::Timer { node_id, resolved_at } => {
            (node_id, "timer", Some(encode_ts(resolved_at)), None)
        }
        NewWaitTicket::Approval { node_id, token } => (node_id, "approval", None, Some(token)),
    };

    sqlx::query(
        r#"
        INSERT INTO wait_tickets (execution_id, node_id, wait_type, resolved_at, approval_token, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(node_id)
    .bind(wait_type)
    .bind(resolved_at)
    .bind(token)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Claim a satisfied wait ticket and move its execution past the wait node.
///
/// The ticket delete is the claim: it only matches a ticket that is due at
/// `claim.now`, and only one caller can delete it.  Returns `Ok(false)` for
/// the loser of a race (or a ticket that is not yet due); nothing is written
/// in that case.
pub async fn resume_from_wait(pool: &SqlitePool, claim: ResumeClaim<'_>) -> Result<bool, DbError> {
    let id = claim.execution_id.to_string();
    let now = encode_ts(claim.now);
    let mut tx = pool.begin().await?;

    let claimed = sqlx::query(
        r#"
        DELETE FROM wait_tickets
        WHERE execution_id = ?
          AND ((resolved_at IS NOT NULL AND resolved_at <= ?) OR decision IS NOT NULL)
        "#,
    )
    .bind(&id)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    if claimed.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let resumed = sqlx::query(
        r#"
        UPDATE executions
        SET status = 'running', current_node_id = ?, context = ?, updated_at = ?
        WHERE id = ? AND status = 'waiting'
        "#,
    )
    .bind(claim.next_node_id)
    .bind(serde_json::to_string(claim.context)?)
    .bind(&now)
    .bind(&id)
    .execute(&mut *tx)
    .await?;

    if resumed.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    if let Some(log_id) = claim.log_id {
        sqlx::query(
            r#"
            UPDATE node_execution_logs
            SET status = 'completed', completed_at = ?, output = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(&now)
        .bind(serde_json::to_string(claim.wait_output)?)
        .bind(log_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}
