//! Row structs and the typed records built from them.
//!
//! These are *persistence* models — they carry no domain behaviour beyond
//! status parsing.  Domain types (graphs, nodes, conditions) live in the
//! `engine` crate.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microsecond
//! precision, `Z` suffix) so that lexical order in SQL equals time order.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;
use uuid::Uuid;

use crate::DbError;

pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn decode_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>, DbError> {
    raw.as_deref().map(decode_ts).transpose()
}

fn decode_uuid(raw: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(raw).map_err(|e| DbError::Corrupt(format!("bad uuid '{raw}': {e}")))
}

fn decode_opt_json(raw: Option<String>) -> Result<Option<Value>, DbError> {
    Ok(raw.as_deref().map(serde_json::from_str).transpose()?)
}

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
pub(crate) struct WorkflowRow {
    pub id: String,
    pub version: i64,
    pub name: String,
    pub definition: String,
    pub created_at: String,
}

/// A persisted, immutable workflow definition version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub version: i64,
    pub name: String,
    /// Full JSON workflow definition (nodes, edges, …).
    pub definition: Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRow> for WorkflowRecord {
    type Error = DbError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Self {
            definition: serde_json::from_str(&row.definition)?,
            created_at: decode_ts(&row.created_at)?,
            id: row.id,
            version: row.version,
            name: row.name,
        })
    }
}

// ---------------------------------------------------------------------------
// executions
// ---------------------------------------------------------------------------

/// Lifecycle of one execution.
///
/// `Running → {Waiting, Completed, Failed, Paused, Cancelled}`,
/// `Waiting → {Running, Cancelled}`, `Paused → {Running, Cancelled}`.
/// `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Waiting,
    Completed,
    Failed,
    Paused,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"   => Ok(Self::Running),
            "waiting"   => Ok(Self::Waiting),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "paused"    => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ExecutionRow {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: i64,
    pub trigger_node_id: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub current_node_id: Option<String>,
    pub context: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// A persisted execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: String,
    pub workflow_version: i64,
    pub trigger_node_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Node the engine visits next.  `None` once the run has walked off the
    /// end of the graph.
    pub current_node_id: Option<String>,
    pub context: Map<String, Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Wall-clock duration, available once the execution has finished.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = DbError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(DbError::Corrupt)?;
        let context = match serde_json::from_str(&row.context)? {
            Value::Object(map) => map,
            other => {
                return Err(DbError::Corrupt(format!("execution context is not an object: {other}")))
            }
        };
        Ok(Self {
            id: decode_uuid(&row.id)?,
            status,
            started_at: decode_ts(&row.started_at)?,
            completed_at: decode_opt_ts(row.completed_at)?,
            context,
            result: decode_opt_json(row.result)?,
            workflow_id: row.workflow_id,
            workflow_version: row.workflow_version,
            trigger_node_id: row.trigger_node_id,
            current_node_id: row.current_node_id,
            error: row.error,
        })
    }
}

/// Monitoring query over executions.  Empty filter lists everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionFilter {
    pub status: Option<ExecutionStatus>,
    pub workflow_id: Option<String>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// node_execution_logs
// ---------------------------------------------------------------------------

/// Outcome of a single node visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

impl NodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "skipped"   => Ok(Self::Skipped),
            other       => Err(format!("unknown node status: {other}")),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct NodeLogRow {
    pub id: i64,
    pub execution_id: String,
    pub node_id: String,
    pub node_type: String,
    pub label: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// One entry of the audit trail.  `id` is monotonically increasing and
/// gives the total order of node visits within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLogRecord {
    pub id: i64,
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub label: String,
    pub status: NodeStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub error: Option<String>,
}

impl TryFrom<NodeLogRow> for NodeLogRecord {
    type Error = DbError;

    fn try_from(row: NodeLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            execution_id: decode_uuid(&row.execution_id)?,
            status: row.status.parse().map_err(DbError::Corrupt)?,
            started_at: decode_ts(&row.started_at)?,
            completed_at: decode_opt_ts(row.completed_at)?,
            output: decode_opt_json(row.output)?,
            node_id: row.node_id,
            node_type: row.node_type,
            label: row.label,
            error: row.error,
        })
    }
}

// ---------------------------------------------------------------------------
// wait_tickets
// ---------------------------------------------------------------------------

/// An external reviewer's answer to an approval wait.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// What has to happen before a suspended execution may continue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WakeCondition {
    /// Due once the clock reaches `resolved_at` (duration and until-date waits).
    Timer { resolved_at: DateTime<Utc> },
    /// Due once someone decides on the approval identified by `token`.
    Approval {
        token: String,
        decision: Option<ApprovalDecision>,
    },
}

impl WakeCondition {
    pub fn is_satisfied(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Timer { resolved_at } => *resolved_at <= now,
            Self::Approval { decision, .. } => decision.is_some(),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct WaitTicketRow {
    pub execution_id: String,
    pub node_id: String,
    pub wait_type: String,
    pub resolved_at: Option<String>,
    pub approval_token: Option<String>,
    pub decision: Option<String>,
    pub created_at: String,
}

/// Durable record of a suspended execution.  Exists only while the
/// execution is `Waiting`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitTicketRecord {
    pub execution_id: Uuid,
    pub node_id: String,
    pub wake: WakeCondition,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<WaitTicketRow> for WaitTicketRecord {
    type Error = DbError;

    fn try_from(row: WaitTicketRow) -> Result<Self, Self::Error> {
        let wake = match row.wait_type.as_str() {
            "timer" => {
                let raw = row
                    .resolved_at
                    .ok_or_else(|| DbError::Corrupt("timer ticket without resolved_at".into()))?;
                WakeCondition::Timer { resolved_at: decode_ts(&raw)? }
            }
            "approval" => WakeCondition::Approval {
                token: row
                    .approval_token
                    .ok_or_else(|| DbError::Corrupt("approval ticket without token".into()))?,
                decision: row.decision.as_deref().map(serde_json::from_str).transpose()?,
            },
            other => return Err(DbError::Corrupt(format!("unknown wait type: {other}"))),
        };
        Ok(Self {
            execution_id: decode_uuid(&row.execution_id)?,
            node_id: row.node_id,
            wake,
            created_at: decode_ts(&row.created_at)?,
        })
    }
}
