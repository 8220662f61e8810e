//! `db` crate — pure persistence layer.
//!
//! Provides a connection pool, typed records, and repository functions for
//! every table the engine touches: workflow definitions, executions, the
//! append-only node execution log, and wait tickets.  No business logic
//! lives here; the only rule enforced is that every status write is a
//! compare-and-set against the expected prior status.

pub mod error;
pub mod pool;
pub mod repository;
pub mod models;

pub use pool::DbPool;
pub use error::DbError;
pub use models::{
    ApprovalDecision, ExecutionFilter, ExecutionRecord, ExecutionStatus, NodeLogRecord,
    NodeStatus, WaitTicketRecord, WakeCondition, WorkflowRecord,
};
