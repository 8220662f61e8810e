//! `nodes` crate — the closed set of workflow actions and their handlers.
//!
//! Every action type has exactly one handler, fixed at construction time in
//! [`HandlerTable`].  Handlers translate a node's (templated) parameters into
//! a call on an external collaborator and return that call's JSON output.
//! They never touch execution or log state; only the engine does.

pub mod action;
pub mod collaborators;
pub mod error;
pub mod handlers;
pub mod mock;
pub mod params;
pub mod template;

pub use action::ActionType;
pub use collaborators::Collaborators;
pub use error::NodeError;
pub use handlers::{ActionHandler, ExecutionContext, HandlerTable};
pub use params::validate_parameters;
