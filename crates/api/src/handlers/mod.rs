pub mod approvals;
pub mod events;
pub mod executions;
pub mod workflows;
