//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often due tickets and schedule triggers are checked.
    pub poll_interval_ms: u64,
    /// Upper bound on tickets claimed per poll.
    pub batch_size: i64,
    /// Executions advanced concurrently.
    pub workers: usize,
    /// Re-enter executions left `running` by a previous process at startup.
    pub recover_on_start: bool,
    /// How often to sweep for `running` executions whose lease lapsed.
    pub recover_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 100,
            workers: 8,
            recover_on_start: true,
            recover_interval_ms: 30_000,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn recover_interval(&self) -> Duration {
        Duration::from_millis(self.recover_interval_ms)
    }
}
