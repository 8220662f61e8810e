//! The polling loop.
//!
//! Each tick:
//! 1. Fires every schedule trigger whose next cron instant has passed.
//! 2. Reads a batch of satisfied wait tickets and claims each one.  The
//!    claim is a single transaction, so several schedulers may poll the
//!    same database; the loser gets `ClaimConflict` and moves on.  Won
//!    claims are handed to the worker pool and the poll returns without
//!    waiting for them, so a slow handler never delays the next tick.
//! 3. Every `recover_interval_ms`, re-enters `running` executions whose run
//!    lease has lapsed, which is what a crashed process leaves behind.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use db::repository::{executions, tickets, workflows};
use engine::EngineError;

use crate::{RunHandle, SchedulerConfig, SchedulerError, WorkerPool};

/// What one poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Tickets this scheduler claimed and handed to a worker.
    pub resumed: usize,
    /// Tickets another scheduler claimed first.
    pub conflicts: usize,
    /// Claims that ended in an engine error.
    pub errors: usize,
}

/// Result of one poll: the counts, plus the runs it started.
///
/// Dropping `runs` detaches them; they still finish on the pool.
pub struct Resumed {
    pub report: PollReport,
    pub runs: Vec<RunHandle>,
}

impl Resumed {
    fn empty() -> Self {
        Self { report: PollReport::default(), runs: Vec::new() }
    }
}

pub struct Scheduler {
    workers: WorkerPool,
    config: SchedulerConfig,
    /// Last cron instant fired per `(workflow id, trigger node id)`.
    last_fired: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl Scheduler {
    pub fn new(workers: WorkerPool, config: SchedulerConfig) -> Self {
        Self { workers, config, last_fired: Mutex::new(HashMap::new()) }
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), SchedulerError> {
        if self.config.recover_on_start {
            let recovered = self.recover().await?;
            if !recovered.is_empty() {
                info!(count = recovered.len(), "re-entering interrupted executions");
            }
        }

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_recovery = Instant::now();
        info!(interval_ms = self.config.poll_interval_ms, "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => {
                    info!("scheduler shutting down");
                    return Ok(());
                }
            }

            let now = Utc::now();
            if let Err(e) = self.fire_due_schedules(now).await {
                warn!(error = %e, "schedule trigger pass failed");
            }
            match self.poll_and_resume_at(now).await {
                Ok(Resumed { report, .. }) if report != PollReport::default() => {
                    info!(resumed = report.resumed, conflicts = report.conflicts, errors = report.errors, "poll finished")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "poll failed"),
            }

            if last_recovery.elapsed() >= self.config.recover_interval() {
                last_recovery = Instant::now();
                match self.recover_stale_at(now).await {
                    Ok(runs) if !runs.is_empty() => info!(count = runs.len(), "re-entering stale executions"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "stale execution sweep failed"),
                }
            }
        }
    }

    pub async fn poll_and_resume(&self) -> Result<Resumed, SchedulerError> {
        self.poll_and_resume_at(Utc::now()).await
    }

    /// Claim every ticket satisfied at `now` and start its run on the pool.
    /// Returns once the claims are made; the runs continue in the
    /// background.
    #[instrument(skip(self))]
    pub async fn poll_and_resume_at(&self, now: DateTime<Utc>) -> Result<Resumed, SchedulerError> {
        let executor = self.workers.executor();
        let due = tickets::due_tickets(executor.pool(), now, self.config.batch_size).await?;
        if due.is_empty() {
            return Ok(Resumed::empty());
        }
        debug!(count = due.len(), "due wait tickets");

        let mut resumed = Resumed::empty();
        for ticket in due {
            let id = ticket.execution_id;
            match executor.claim_ticket(&ticket, now).await {
                Ok(()) => {
                    resumed.report.resumed += 1;
                    resumed.runs.push(self.workers.spawn_run(id));
                }
                Err(EngineError::ClaimConflict(_)) => {
                    debug!(execution_id = %id, "lost wait ticket claim");
                    resumed.report.conflicts += 1;
                }
                Err(e) => {
                    warn!(execution_id = %id, error = %e, "cannot claim wait ticket");
                    resumed.report.errors += 1;
                }
            }
        }
        Ok(resumed)
    }

    /// Fire schedule triggers whose next instant after the last firing is
    /// at or before `now`.  A trigger seen for the first time only records
    /// `now` as its baseline.  After a long gap a trigger fires once, not
    /// once per missed instant.
    #[instrument(skip(self))]
    pub async fn fire_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<RunHandle>, SchedulerError> {
        let executor = self.workers.executor();
        let mut handles = Vec::new();

        for record in workflows::list_workflows(executor.pool()).await? {
            let graph = match executor.graph_from_record(&record) {
                Ok(graph) => graph,
                Err(e) => {
                    warn!(workflow_id = %record.id, error = %e, "skipping unloadable workflow");
                    continue;
                }
            };

            for (node_id, expression) in graph.schedule_triggers() {
                // Validation already parsed the expression.
                let Ok(schedule) = Schedule::from_str(expression) else { continue };
                let Some(due_at) = self.claim_instant(&record.id, node_id, &schedule, now) else { continue };

                let exec = executor.fire_schedule(&graph, node_id, due_at).await?;
                info!(workflow_id = %record.id, trigger = node_id, execution_id = %exec.id, %due_at, "schedule fired");
                handles.push(self.workers.spawn_run(exec.id));
            }
        }
        Ok(handles)
    }

    fn claim_instant(
        &self,
        workflow_id: &str,
        node_id: &str,
        schedule: &Schedule,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let mut last_fired = self.last_fired.lock().ok()?;
        let key = (workflow_id.to_owned(), node_id.to_owned());
        let Some(last) = last_fired.get(&key).copied() else {
            last_fired.insert(key, now);
            return None;
        };

        let due_at = schedule.after(&last).next().filter(|at| *at <= now)?;
        last_fired.insert(key, now);
        Some(due_at)
    }

    /// Re-enter every execution left `running` with no live lease,
    /// typically by a process that stopped mid-run.  Each resumes at its
    /// `current_node_id`.
    pub async fn recover(&self) -> Result<Vec<RunHandle>, SchedulerError> {
        let now = Utc::now();
        self.recover_untouched_since(now, now).await
    }

    /// Like [`Self::recover`], but skips executions written within the last
    /// lease period, which a live worker may be about to pick up.
    pub async fn recover_stale_at(&self, now: DateTime<Utc>) -> Result<Vec<RunHandle>, SchedulerError> {
        self.recover_untouched_since(now, now - self.workers.executor().lease_ttl()).await
    }

    async fn recover_untouched_since(
        &self,
        now: DateTime<Utc>,
        untouched_since: DateTime<Utc>,
    ) -> Result<Vec<RunHandle>, SchedulerError> {
        let pool = self.workers.executor().pool();
        let stranded = executions::list_unleased(pool, now, untouched_since, self.config.batch_size).await?;
        Ok(stranded.into_iter().map(|exec| self.workers.spawn_run(exec.id)).collect())
    }
}
