//! Bounded pool of tasks advancing executions.
//!
//! Each run holds a semaphore permit for its whole duration, including
//! time spent inside a blocking handler call, so at most `size` executions
//! are being advanced at once.  Suspended executions hold nothing.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use engine::{EngineError, RunOutcome, WorkflowExecutor};

pub type RunHandle = JoinHandle<Result<RunOutcome, EngineError>>;

#[derive(Clone)]
pub struct WorkerPool {
    executor: Arc<WorkflowExecutor>,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(executor: Arc<WorkflowExecutor>, size: usize) -> Self {
        Self { executor, permits: Arc::new(Semaphore::new(size.max(1))) }
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    /// Advance `execution_id` on a pool worker.
    pub fn spawn_run(&self, execution_id: Uuid) -> RunHandle {
        let executor = self.executor.clone();
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            let result = executor.run(execution_id).await;
            report(execution_id, &result);
            result
        })
    }
}

fn report(execution_id: Uuid, result: &Result<RunOutcome, EngineError>) {
    match result {
        Ok(RunOutcome::Failed { node_id, error }) => {
            warn!(%execution_id, %node_id, %error, "execution failed")
        }
        Ok(outcome) => debug!(%execution_id, ?outcome, "worker finished"),
        Err(EngineError::AlreadyRunning(_)) => debug!(%execution_id, "execution held by another worker"),
        Err(e) => error!(%execution_id, error = %e, "worker error"),
    }
}
