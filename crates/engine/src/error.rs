//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use db::ExecutionStatus;

use crate::models::Branch;

/// Reasons a workflow definition is rejected.  Raised before any execution
/// exists.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphValidationError {
    /// The definition has no trigger node at all.
    #[error("workflow has no trigger node")]
    NoTrigger,

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    /// Trigger nodes only start runs; nothing may lead into them.
    #[error("edge '{source_id}' -> '{trigger_id}' points into a trigger node")]
    EdgeIntoTrigger {
        source_id: String,
        trigger_id: String,
    },

    /// A node that no trigger can reach.
    #[error("node '{0}' is not reachable from any trigger")]
    Unreachable(String),

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// A condition node lacks its `true` or `false` edge.
    #[error("condition '{node_id}' has no '{branch}' edge")]
    MissingBranch { node_id: String, branch: Branch },

    /// A condition node has two edges for the same branch.
    #[error("condition '{node_id}' has more than one '{branch}' edge")]
    DuplicateBranch { node_id: String, branch: Branch },

    /// Branch tags are only meaningful on edges leaving a condition; every
    /// edge leaving a condition needs one.
    #[error("edge '{source_id}' -> '{target_id}': {reason}")]
    BadBranchTag {
        source_id: String,
        target_id: String,
        reason: &'static str,
    },

    /// Trigger, action and wait nodes have at most one successor.
    #[error("node '{0}' has more than one outgoing edge")]
    TooManySuccessors(String),

    #[error("condition '{node_id}' is invalid: {message}")]
    InvalidCondition { node_id: String, message: String },

    #[error("action '{node_id}' has invalid parameters: {message}")]
    InvalidParameters { node_id: String, message: String },

    #[error("wait '{node_id}' is invalid: {message}")]
    InvalidWait { node_id: String, message: String },

    #[error("trigger '{node_id}' is invalid: {message}")]
    InvalidTrigger { node_id: String, message: String },
}

/// Errors produced by the workflow engine outside of a node's own failure.
///
/// A failing action is not an `EngineError`: it ends the run with
/// [`crate::RunOutcome::Failed`] and is recorded in the log.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid workflow: {0}")]
    Validation(#[from] GraphValidationError),

    #[error("malformed workflow definition: {0}")]
    MalformedDefinition(#[from] serde_json::Error),

    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("workflow '{workflow_id}' has no matching trigger: {detail}")]
    NoMatchingTrigger { workflow_id: String, detail: String },

    /// A trigger payload key collides with a node id or `_trigger`; node
    /// outputs and firing metadata are written under those keys.
    #[error("payload key '{key}' is reserved in workflow '{workflow_id}'")]
    ReservedContextKey { workflow_id: String, key: String },

    /// The stored cursor names a node the workflow doesn't have.
    #[error("execution {execution_id} points at unknown node '{node_id}'")]
    UnknownNode { execution_id: Uuid, node_id: String },

    #[error("execution {id} is {status}; cannot {action}")]
    InvalidTransition {
        id: Uuid,
        status: ExecutionStatus,
        action: &'static str,
    },

    /// Another `run` for the same execution is in progress, in this process
    /// or in another executor holding its run lease.
    #[error("execution {0} is already being advanced")]
    AlreadyRunning(Uuid),

    #[error("wait ticket for execution {0} is not due yet")]
    TicketNotDue(Uuid),

    /// Lost the race to claim a wait ticket.  The winner resumes the run.
    #[error("wait ticket for execution {0} was claimed by another worker")]
    ClaimConflict(Uuid),

    #[error("approval token '{0}' is unknown or already decided")]
    UnknownApproval(String),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}
