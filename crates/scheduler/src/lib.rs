//! `scheduler` crate — wakes suspended executions and fires schedule
//! triggers.
//!
//! The scheduler owns no state of its own beyond cron bookkeeping: wait
//! tickets in the database are the only record of what is suspended, so a
//! restarted scheduler picks up exactly where the previous one stopped.

pub mod config;
pub mod error;
pub mod workers;
pub mod poller;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use poller::{PollReport, Resumed, Scheduler};
pub use workers::{RunHandle, WorkerPool};
