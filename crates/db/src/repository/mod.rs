//! Repository functions — one function per database operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! Functions that change an execution's status return `Ok(false)` when the
//! row was not in the expected prior status; callers treat that as "someone
//! else got there first".

pub mod workflows;
pub mod executions;
pub mod logs;
pub mod tickets;
