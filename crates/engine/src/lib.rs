//! `engine` crate — workflow definition model, graph validation, the
//! condition grammar, and the execution engine.

pub mod models;
pub mod error;
pub mod condition;
pub mod dag;
pub mod executor;
pub mod triggers;

pub use models::{
    Branch, DurationUnit, EdgeDefinition, NodeDefinition, NodeKind, TriggerSpec, WaitSpec,
    WorkflowDefinition,
};
pub use error::{EngineError, GraphValidationError};
pub use condition::ConditionExpr;
pub use dag::{validate, ExecutableGraph};
pub use executor::{ExecutorConfig, RunOutcome, WorkflowExecutor};

#[cfg(test)]
mod executor_tests;
