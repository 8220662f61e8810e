//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator and the only writer of
//! execution and log state:
//! 1. Creates executions when triggers fire (see [`crate::triggers`]).
//! 2. Walks the graph from `current_node_id`, appending a `running` log entry
//!    before each node and finalizing it afterwards.
//! 3. Dispatches actions to the fixed [`HandlerTable`], each call bounded by
//!    a per-action timeout, and merges the output into the context under the
//!    node's id.
//! 4. Suspends on wait nodes by persisting a wait ticket and returning; the
//!    scheduler calls [`WorkflowExecutor::claim_ticket`] when it is due and
//!    hands the execution back to `run`.
//! 5. Renews its run lease before every node.  The lease is only granted
//!    while the execution is `running`, so pause and cancel requests take
//!    effect at the next step boundary.
//!
//! There is no retry: a handler error ends the run as `Failed`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::repository::{
    executions::{self as exec_repo, NewWaitTicket, ResumeClaim},
    logs::{self as log_repo, NewLog},
    tickets as ticket_repo,
    workflows as wf_repo,
};
use db::{
    ApprovalDecision, DbError, DbPool, ExecutionRecord, ExecutionStatus, NodeStatus,
    WaitTicketRecord, WakeCondition, WorkflowRecord,
};
use nodes::{ActionType, Collaborators, ExecutionContext, HandlerTable, NodeError};

use crate::dag::{validate, ExecutableGraph, ExecutableNode, Step, Successors};
use crate::models::{Branch, WaitSpec, WorkflowDefinition};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Time bound for a handler call when its action type has no override.
    pub default_timeout_ms: u64,
    /// Per-action-type overrides of the time bound.
    pub action_timeouts_ms: HashMap<ActionType, u64>,
    /// How long a run lease lasts.  Renewed before every node, so it must
    /// exceed the longest action timeout.
    pub lease_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            action_timeouts_ms: HashMap::from([
                (ActionType::CallWebhook, 10_000),
                (ActionType::GenerateDocument, 60_000),
            ]),
            lease_ms: 120_000,
        }
    }
}

impl ExecutorConfig {
    pub fn timeout_for(&self, action: ActionType) -> Duration {
        let ms = self.action_timeouts_ms.get(&action).copied().unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn lease(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.lease_ms).unwrap_or(i64::MAX))
    }
}

// ---------------------------------------------------------------------------
// Outcome of advancing an execution
// ---------------------------------------------------------------------------

/// Where a call to [`WorkflowExecutor::run`] left the execution.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Walked off the end of the graph; `result` is the final context.
    Completed { result: Value },
    /// Parked on a wait node until the ticket is satisfied.
    Suspended(WaitTicketRecord),
    /// A handler failed; the error is also on the node's log entry.
    Failed { node_id: String, error: String },
    Paused,
    Cancelled,
    /// The executor is shutting down.  The execution stays `running` with
    /// its lease released, so a later `run` (in any process) picks it up at
    /// the same node.
    Interrupted,
}

/// What visiting one node decided.
enum Visit {
    Advance { output: Value, merge: bool, next: Option<String> },
    Suspend { ticket: WaitTicketRecord, output: Value },
    Fail(NodeError),
    Interrupted,
}

/// Removes the execution from the in-flight set when dropped.
struct RunGuard<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.in_flight.lock() {
            set.remove(&self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Advances executions through their workflow graphs.
///
/// One executor per process.  Many executions may be advanced concurrently
/// through a shared `Arc<WorkflowExecutor>`; a given execution is only ever
/// advanced by one caller at a time.  Inside the process that is the
/// in-flight set; across processes sharing a database it is the run lease,
/// held under this executor's `owner` id.
pub struct WorkflowExecutor {
    pool: DbPool,
    owner: Uuid,
    handlers: HandlerTable,
    config: ExecutorConfig,
    graphs: Mutex<HashMap<(String, i64), Arc<ExecutableGraph>>>,
    in_flight: Mutex<HashSet<Uuid>>,
    shutdown: CancellationToken,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(pool: DbPool, collaborators: Collaborators, config: ExecutorConfig) -> Self {
        Self {
            pool,
            owner: Uuid::new_v4(),
            handlers: HandlerTable::new(collaborators),
            config,
            graphs: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Abandon in-flight handler calls and stop advancing.  Runs that are
    /// interrupted stay `running` for recovery.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Lifetime of a run lease taken by this executor.
    pub fn lease_ttl(&self) -> chrono::Duration {
        self.config.lease()
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Validate and store a workflow definition.  Nothing is stored if
    /// validation fails.
    pub async fn save_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowRecord, EngineError> {
        let graph = validate(definition)?;
        let record = wf_repo::save_workflow(
            &self.pool,
            &definition.id,
            definition.version,
            &definition.name,
            &serde_json::to_value(definition)?,
        )
        .await?;

        info!(workflow_id = %record.id, version = record.version, "workflow stored");
        self.cache_graph(Arc::new(graph));
        Ok(record)
    }

    /// The validated graph for one stored workflow version.
    pub async fn graph(&self, workflow_id: &str, version: i64) -> Result<Arc<ExecutableGraph>, EngineError> {
        let key = (workflow_id.to_owned(), version);
        if let Some(graph) = self.graphs.lock().ok().and_then(|g| g.get(&key).cloned()) {
            return Ok(graph);
        }

        let record = wf_repo::get_workflow(&self.pool, workflow_id, version)
            .await
            .map_err(|e| not_found(e, || EngineError::WorkflowNotFound(workflow_id.to_owned())))?;
        self.graph_from_record(&record)
    }

    /// The validated graph of the latest stored version.
    pub async fn latest_graph(&self, workflow_id: &str) -> Result<Arc<ExecutableGraph>, EngineError> {
        let record = wf_repo::latest_workflow(&self.pool, workflow_id)
            .await
            .map_err(|e| not_found(e, || EngineError::WorkflowNotFound(workflow_id.to_owned())))?;
        self.graph_from_record(&record)
    }

    /// The validated graph for an already-loaded record.
    pub fn graph_from_record(&self, record: &WorkflowRecord) -> Result<Arc<ExecutableGraph>, EngineError> {
        let key = (record.id.clone(), record.version);
        if let Some(graph) = self.graphs.lock().ok().and_then(|g| g.get(&key).cloned()) {
            return Ok(graph);
        }
        let definition: WorkflowDefinition = serde_json::from_value(record.definition.clone())?;
        let graph = Arc::new(validate(&definition)?);
        self.cache_graph(graph.clone());
        Ok(graph)
    }

    fn cache_graph(&self, graph: Arc<ExecutableGraph>) {
        if let Ok(mut graphs) = self.graphs.lock() {
            graphs.insert((graph.workflow_id.clone(), graph.version), graph);
        }
    }

    // -----------------------------------------------------------------------
    // Starting and advancing
    // -----------------------------------------------------------------------

    /// Create an execution positioned on `trigger_node_id` with `context`.
    pub async fn start(
        &self,
        graph: &ExecutableGraph,
        trigger_node_id: &str,
        context: Map<String, Value>,
    ) -> Result<ExecutionRecord, EngineError> {
        match graph.node(trigger_node_id).map(|n| &n.step) {
            Some(Step::Trigger(_)) => {}
            _ => {
                return Err(EngineError::NoMatchingTrigger {
                    workflow_id: graph.workflow_id.clone(),
                    detail: format!("'{trigger_node_id}' is not a trigger node"),
                })
            }
        }

        let exec = exec_repo::create_execution(
            &self.pool,
            exec_repo::NewExecution {
                workflow_id: &graph.workflow_id,
                workflow_version: graph.version,
                trigger_node_id,
                context: &context,
            },
        )
        .await?;

        info!(execution_id = %exec.id, workflow_id = %graph.workflow_id, trigger = trigger_node_id, "execution created");
        Ok(exec)
    }

    /// Advance an execution from its current node until it completes,
    /// fails, suspends, or is stopped.
    ///
    /// Safe to call again after a crash: it resumes at `current_node_id`.
    /// Calling it on a waiting, paused or finished execution reports that
    /// state without changing anything.
    ///
    /// # Errors
    /// `AlreadyRunning` if another call is advancing the same execution,
    /// in this process or in another one sharing the database; lookup and
    /// database problems otherwise.
    #[instrument(skip_all, fields(execution_id = %execution_id))]
    pub async fn run(&self, execution_id: Uuid) -> Result<RunOutcome, EngineError> {
        let _guard = self.claim_run(execution_id)?;
        let exec = self.execution(execution_id).await?;
        if exec.status != ExecutionStatus::Running {
            return self.settled(&exec).await;
        }
        let graph = self.graph(&exec.workflow_id, exec.workflow_version).await?;

        let outcome = self.drive(exec, &graph).await;
        if let Err(e) = exec_repo::release_lease(&self.pool, execution_id, self.owner).await {
            warn!(error = %e, "cannot release run lease");
        }
        outcome
    }

    fn claim_run(&self, id: Uuid) -> Result<RunGuard<'_>, EngineError> {
        let mut set = self.in_flight.lock().map_err(|_| EngineError::AlreadyRunning(id))?;
        if !set.insert(id) {
            return Err(EngineError::AlreadyRunning(id));
        }
        Ok(RunGuard { in_flight: &self.in_flight, id })
    }

    async fn execution(&self, id: Uuid) -> Result<ExecutionRecord, EngineError> {
        exec_repo::get_execution(&self.pool, id)
            .await
            .map_err(|e| not_found(e, || EngineError::ExecutionNotFound(id)))
    }

    /// Outcome for an execution that is not `running`.
    async fn settled(&self, exec: &ExecutionRecord) -> Result<RunOutcome, EngineError> {
        Ok(match exec.status {
            ExecutionStatus::Completed => RunOutcome::Completed {
                result: exec.result.clone().unwrap_or(Value::Null),
            },
            ExecutionStatus::Failed => RunOutcome::Failed {
                node_id: exec.current_node_id.clone().unwrap_or_default(),
                error: exec.error.clone().unwrap_or_default(),
            },
            ExecutionStatus::Paused => RunOutcome::Paused,
            ExecutionStatus::Cancelled => RunOutcome::Cancelled,
            ExecutionStatus::Waiting => match ticket_repo::get_ticket(&self.pool, exec.id).await? {
                Some(ticket) => RunOutcome::Suspended(ticket),
                None => {
                    return Err(EngineError::InvalidTransition {
                        id: exec.id,
                        status: exec.status,
                        action: "run (waiting without a ticket)",
                    })
                }
            },
            // Still running, so another executor holds the lease.
            ExecutionStatus::Running => return Err(EngineError::AlreadyRunning(exec.id)),
        })
    }

    /// Someone else changed the status or took the lease; report what the
    /// execution is now.
    async fn stopped(&self, id: Uuid) -> Result<RunOutcome, EngineError> {
        let exec = self.execution(id).await?;
        debug!(status = %exec.status, "execution stopped externally");
        self.settled(&exec).await
    }

    async fn drive(
        &self,
        mut exec: ExecutionRecord,
        graph: &ExecutableGraph,
    ) -> Result<RunOutcome, EngineError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(RunOutcome::Interrupted);
            }
            // Also the pause/cancel check: the lease is only granted while `running`.
            if !exec_repo::acquire_lease(&self.pool, exec.id, self.owner, Utc::now(), self.config.lease())
                .await?
            {
                return self.stopped(exec.id).await;
            }

            let Some(node_id) = exec.current_node_id.clone() else {
                let result = Value::Object(exec.context.clone());
                if !exec_repo::complete_execution(&self.pool, exec.id, self.owner, &result).await? {
                    return self.stopped(exec.id).await;
                }
                info!("execution completed");
                return Ok(RunOutcome::Completed { result });
            };

            let node = graph.node(&node_id).ok_or_else(|| EngineError::UnknownNode {
                execution_id: exec.id,
                node_id: node_id.clone(),
            })?;

            let log_id = log_repo::append_log(
                &self.pool,
                NewLog {
                    execution_id: exec.id,
                    node_id: &node.id,
                    node_type: node.log_type(),
                    label: &node.label,
                },
            )
            .await?;

            match self.visit(&exec, graph, node).await {
                Visit::Advance { output, merge, next } => {
                    log_repo::finish_log(&self.pool, log_id, NodeStatus::Completed, Some(&output), None)
                        .await?;
                    if merge {
                        exec.context.insert(node.id.clone(), output);
                    }
                    exec.current_node_id = next;
                    debug!(node_id = %node.id, next = ?exec.current_node_id, "node completed");
                    if !exec_repo::advance_execution(
                        &self.pool,
                        exec.id,
                        self.owner,
                        exec.current_node_id.as_deref(),
                        &exec.context,
                    )
                    .await?
                    {
                        return self.stopped(exec.id).await;
                    }
                }

                Visit::Suspend { ticket, output } => {
                    let new_ticket = match &ticket.wake {
                        WakeCondition::Timer { resolved_at } => {
                            NewWaitTicket::Timer { node_id: &node.id, resolved_at: *resolved_at }
                        }
                        WakeCondition::Approval { token, .. } => {
                            NewWaitTicket::Approval { node_id: &node.id, token }
                        }
                    };
                    if !exec_repo::suspend_execution(&self.pool, exec.id, self.owner, &exec.context, new_ticket)
                        .await?
                    {
                        log_repo::finish_log(&self.pool, log_id, NodeStatus::Skipped, Some(&output), None)
                            .await?;
                        return self.stopped(exec.id).await;
                    }
                    info!(node_id = %node.id, wake = ?ticket.wake, "execution suspended");
                    return Ok(RunOutcome::Suspended(ticket));
                }

                Visit::Fail(err) => {
                    let message = err.to_string();
                    error!(node_id = %node.id, error = %message, "node failed");
                    log_repo::finish_log(&self.pool, log_id, NodeStatus::Failed, None, Some(&message))
                        .await?;
                    if !exec_repo::fail_execution(&self.pool, exec.id, self.owner, &message).await? {
                        return self.stopped(exec.id).await;
                    }
                    return Ok(RunOutcome::Failed { node_id: node.id.clone(), error: message });
                }

                // The log entry stays `running`: the action may have partially happened.
                Visit::Interrupted => {
                    warn!(node_id = %node.id, "node interrupted by shutdown");
                    return Ok(RunOutcome::Interrupted);
                }
            }
        }
    }

    async fn visit(&self, exec: &ExecutionRecord, graph: &ExecutableGraph, node: &ExecutableNode) -> Visit {
        let single = || node.next.single().map(str::to_owned);

        match &node.step {
            Step::Trigger(spec) => Visit::Advance {
                output: json!({ "trigger": spec.kind() }),
                merge: false,
                next: single(),
            },

            Step::Action { action, parameters } => {
                let ctx = ExecutionContext {
                    workflow_id: graph.workflow_id.clone(),
                    execution_id: exec.id,
                    node_id: node.id.clone(),
                    data: exec.context.clone(),
                };
                match self.call_handler(*action, parameters, &ctx).await {
                    Ok(output) => Visit::Advance { output, merge: true, next: single() },
                    Err(NodeError::Cancelled) => Visit::Interrupted,
                    Err(err) => Visit::Fail(err),
                }
            }

            Step::Condition { expr, true_label, false_label } => {
                let branch = Branch::from(expr.evaluate(&exec.context));
                let (label, next) = match (&node.next, branch) {
                    (Successors::Branch { on_true, .. }, Branch::True) => (true_label, on_true),
                    (Successors::Branch { on_false, .. }, Branch::False) => (false_label, on_false),
                    _ => {
                        return Visit::Fail(NodeError::InvalidParameters(format!(
                            "condition '{}' has no branches",
                            node.id
                        )))
                    }
                };
                Visit::Advance {
                    output: json!({
                        "expression": expr.to_string(),
                        "branch": branch,
                        "label": label,
                    }),
                    merge: false,
                    next: Some(next.clone()),
                }
            }

            Step::Wait(spec) => {
                let now = Utc::now();
                let wake = match spec.resolve_at(now) {
                    Some(resolved_at) => WakeCondition::Timer { resolved_at },
                    None => WakeCondition::Approval { token: Uuid::new_v4().to_string(), decision: None },
                };
                let output = match (&wake, spec) {
                    (WakeCondition::Timer { resolved_at }, _) => json!({ "resolved_at": resolved_at }),
                    (WakeCondition::Approval { token, .. }, WaitSpec::Approval { approver, message }) => {
                        json!({ "approval_token": token, "approver": approver, "message": message })
                    }
                    (WakeCondition::Approval { token, .. }, _) => json!({ "approval_token": token }),
                };
                Visit::Suspend {
                    ticket: WaitTicketRecord {
                        execution_id: exec.id,
                        node_id: node.id.clone(),
                        wake,
                        created_at: now,
                    },
                    output,
                }
            }
        }
    }

    /// Invoke the handler under its time bound and the shutdown signal.
    async fn call_handler(
        &self,
        action: ActionType,
        parameters: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let bound = self.config.timeout_for(action);
        let call = self.handlers.get(action).execute(parameters, ctx);

        tokio::select! {
            result = tokio::time::timeout(bound, call) => match result {
                Ok(outcome) => outcome,
                Err(_) => Err(NodeError::Timeout(bound)),
            },
            _ = self.shutdown.cancelled() => Err(NodeError::Cancelled),
        }
    }

    // -----------------------------------------------------------------------
    // Resumption
    // -----------------------------------------------------------------------

    /// Claim a satisfied wait ticket and continue the run past its wait node.
    ///
    /// # Errors
    /// As [`Self::claim_ticket`], then as [`Self::run`].
    #[instrument(skip_all, fields(execution_id = %ticket.execution_id))]
    pub async fn resume_ticket(
        &self,
        ticket: &WaitTicketRecord,
        now: DateTime<Utc>,
    ) -> Result<RunOutcome, EngineError> {
        self.claim_ticket(ticket, now).await?;
        self.run(ticket.execution_id).await
    }

    /// Claim a satisfied wait ticket without advancing the run.
    ///
    /// The claim deletes the ticket, moves the execution back to `running`
    /// on the wait node's successor and finalizes the wait node's log entry
    /// in one transaction, so only one caller can ever claim a ticket.  The
    /// winner hands the execution to [`Self::run`].
    ///
    /// # Errors
    /// `TicketNotDue` if the wake condition does not hold at `now`;
    /// `ClaimConflict` if another worker claimed the ticket first.
    pub async fn claim_ticket(&self, ticket: &WaitTicketRecord, now: DateTime<Utc>) -> Result<(), EngineError> {
        if !ticket.wake.is_satisfied(now) {
            return Err(EngineError::TicketNotDue(ticket.execution_id));
        }

        let mut exec = self.execution(ticket.execution_id).await?;
        if exec.status != ExecutionStatus::Waiting {
            return Err(EngineError::ClaimConflict(exec.id));
        }
        let graph = self.graph(&exec.workflow_id, exec.workflow_version).await?;
        let node = graph.node(&ticket.node_id).ok_or_else(|| EngineError::UnknownNode {
            execution_id: exec.id,
            node_id: ticket.node_id.clone(),
        })?;

        let output = match &ticket.wake {
            WakeCondition::Timer { resolved_at } => {
                json!({ "resolved_at": resolved_at, "resumed_at": now })
            }
            WakeCondition::Approval { token, decision } => json!({
                "approval_token": token,
                "approved": decision.as_ref().map(|d| d.approved),
                "comment": decision.as_ref().and_then(|d| d.comment.clone()),
                "decided_at": decision.as_ref().map(|d| d.decided_at),
            }),
        };
        exec.context.insert(node.id.clone(), output.clone());

        let log_id = log_repo::open_log_for(&self.pool, exec.id, &node.id).await?;
        let claimed = exec_repo::resume_from_wait(
            &self.pool,
            ResumeClaim {
                execution_id: exec.id,
                log_id,
                wait_output: &output,
                next_node_id: node.next.single(),
                context: &exec.context,
                now,
            },
        )
        .await?;

        if !claimed {
            debug!(execution_id = %exec.id, "wait ticket already claimed");
            return Err(EngineError::ClaimConflict(exec.id));
        }

        info!(execution_id = %exec.id, node_id = %node.id, "wait ticket claimed");
        Ok(())
    }

    /// Record a decision on an outstanding approval.  The scheduler resumes
    /// the execution on its next poll.
    pub async fn approve(
        &self,
        token: &str,
        approved: bool,
        comment: Option<String>,
    ) -> Result<WaitTicketRecord, EngineError> {
        let decision = ApprovalDecision { approved, comment, decided_at: Utc::now() };
        if !ticket_repo::decide_approval(&self.pool, token, &decision).await? {
            return Err(EngineError::UnknownApproval(token.to_owned()));
        }
        info!(token, approved, "approval decided");
        ticket_repo::ticket_by_token(&self.pool, token)
            .await?
            .ok_or_else(|| EngineError::UnknownApproval(token.to_owned()))
    }

    // -----------------------------------------------------------------------
    // External control
    // -----------------------------------------------------------------------

    /// `running → paused`.  Takes effect at the next node boundary.
    pub async fn pause(&self, id: Uuid) -> Result<(), EngineError> {
        self.transition(id, ExecutionStatus::Running, ExecutionStatus::Paused, "pause").await
    }

    /// `paused → running`.  The caller then calls [`Self::run`] to continue.
    pub async fn resume_paused(&self, id: Uuid) -> Result<(), EngineError> {
        self.transition(id, ExecutionStatus::Paused, ExecutionStatus::Running, "resume").await
    }

    /// Any non-terminal state → `cancelled`.  An in-flight handler call is
    /// allowed to finish, but the run will not advance afterwards.
    pub async fn cancel(&self, id: Uuid) -> Result<(), EngineError> {
        if exec_repo::cancel_execution(&self.pool, id).await? {
            info!(execution_id = %id, "execution cancelled");
            return Ok(());
        }
        let exec = self.execution(id).await?;
        Err(EngineError::InvalidTransition { id, status: exec.status, action: "cancel" })
    }

    async fn transition(
        &self,
        id: Uuid,
        from: ExecutionStatus,
        to: ExecutionStatus,
        action: &'static str,
    ) -> Result<(), EngineError> {
        if exec_repo::transition_status(&self.pool, id, from, to).await? {
            info!(execution_id = %id, status = %to, "execution {action}d");
            return Ok(());
        }
        let exec = self.execution(id).await?;
        Err(EngineError::InvalidTransition { id, status: exec.status, action })
    }
}

fn not_found(err: DbError, missing: impl FnOnce() -> EngineError) -> EngineError {
    match err {
        DbError::NotFound => missing(),
        other => EngineError::Database(other),
    }
}
