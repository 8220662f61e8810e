//! End-to-end tests for the workflow execution engine.
//!
//! Every test runs against a fresh in-memory SQLite database with the real
//! migrations applied, and `RecordingCollaborators` standing in for every
//! external system.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use db::pool::memory_pool;
use db::repository::{executions, logs, tickets, workflows};
use db::{ExecutionStatus, NodeStatus, WakeCondition};
use nodes::mock::RecordingCollaborators;
use nodes::ActionType;

use crate::models::{
    Branch, DurationUnit, EdgeDefinition as E, NodeDefinition as N, TriggerSpec, WaitSpec,
    WorkflowDefinition,
};
use crate::{EngineError, ExecutorConfig, GraphValidationError, RunOutcome, WorkflowExecutor};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

async fn fixture_with(config: ExecutorConfig) -> (Arc<WorkflowExecutor>, Arc<RecordingCollaborators>) {
    let pool = memory_pool().await.unwrap();
    let mock = RecordingCollaborators::new();
    let executor = Arc::new(WorkflowExecutor::new(pool, mock.collaborators(), config));
    (executor, mock)
}

async fn fixture() -> (Arc<WorkflowExecutor>, Arc<RecordingCollaborators>) {
    fixture_with(ExecutorConfig::default()).await
}

/// Trigger(manual) → create_task → Condition(taskPriority == "high"),
/// true → send_notification, false → update_database.
fn onboarding() -> WorkflowDefinition {
    WorkflowDefinition::new(
        "onboarding",
        vec![
            N::trigger("start", TriggerSpec::Manual),
            N::action(
                "create",
                ActionType::CreateTask,
                json!({ "title": "Onboard {{employee}}", "priority": "{{taskPriority}}" }),
            ),
            N::condition("check", r#"taskPriority == "high""#),
            N::action(
                "notify",
                ActionType::SendNotification,
                json!({ "recipient": "hr-lead", "title": "Urgent", "message": "{{create.task_id}}" }),
            ),
            N::action(
                "archive",
                ActionType::UpdateDatabase,
                json!({ "table": "employees", "record_id": "{{employee}}", "fields": { "queued": true } }),
            ),
        ],
        vec![
            E::new("start", "create"),
            E::new("create", "check"),
            E::branch("check", "notify", Branch::True),
            E::branch("check", "archive", Branch::False),
        ],
    )
}

/// Trigger → Wait(wait) → create_task.
fn waiting(wait: WaitSpec) -> WorkflowDefinition {
    WorkflowDefinition::new(
        "waiting",
        vec![
            N::trigger("start", TriggerSpec::Manual),
            N::wait("pause", wait),
            N::action("after", ActionType::CreateTask, json!({ "title": "follow up" })),
        ],
        vec![E::new("start", "pause"), E::new("pause", "after")],
    )
}

fn two_days() -> WaitSpec {
    WaitSpec::Duration { amount: 2, unit: DurationUnit::Days }
}

async fn fire(executor: &WorkflowExecutor, def: &WorkflowDefinition, payload: Value) -> uuid::Uuid {
    executor.save_definition(def).await.unwrap();
    executor.fire_manual(&def.id, None, payload).await.unwrap().id
}

fn node_ids(entries: &[db::NodeLogRecord]) -> Vec<&str> {
    entries.iter().map(|e| e.node_id.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Branching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn high_priority_runs_the_true_branch() {
    let (executor, mock) = fixture().await;
    let id = fire(&executor, &onboarding(), json!({ "employee": "ada", "taskPriority": "high" })).await;

    let outcome = executor.run(id).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));

    let entries = logs::list_logs(executor.pool(), id).await.unwrap();
    assert_eq!(node_ids(&entries), ["start", "create", "check", "notify"]);
    assert!(entries.iter().all(|e| e.status == NodeStatus::Completed));
    assert_eq!(entries[2].output.as_ref().unwrap()["branch"], "true");
    assert_eq!(entries[2].output.as_ref().unwrap()["label"], "Yes");

    let exec = executions::get_execution(executor.pool(), id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Completed);
    assert!(exec.current_node_id.is_none());
    let result = exec.result.unwrap();
    assert_eq!(result["create"]["title"], "Onboard ada");
    assert_eq!(result["notify"]["recipient"], "hr-lead");

    // The notification message was rendered from the task handler's output.
    let (_, notification) = mock
        .calls()
        .into_iter()
        .find(|(a, _)| *a == ActionType::SendNotification)
        .unwrap();
    assert_eq!(notification["message"], result["create"]["task_id"]);
}

#[tokio::test]
async fn low_priority_ends_on_the_false_branch() {
    let (executor, mock) = fixture().await;
    let id = fire(&executor, &onboarding(), json!({ "employee": "bob", "taskPriority": "low" })).await;

    executor.run(id).await.unwrap();

    let entries = logs::list_logs(executor.pool(), id).await.unwrap();
    assert_eq!(node_ids(&entries), ["start", "create", "check", "archive"]);
    assert_eq!(entries[2].output.as_ref().unwrap()["branch"], "false");
    assert_eq!(mock.call_count(ActionType::SendNotification), 0);
    assert_eq!(
        executions::current_status(executor.pool(), id).await.unwrap(),
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn same_context_always_takes_the_same_branch() {
    let (executor, _mock) = fixture().await;
    executor.save_definition(&onboarding()).await.unwrap();

    let mut paths = Vec::new();
    for _ in 0..3 {
        let exec = executor
            .fire_manual("onboarding", None, json!({ "employee": "cy", "taskPriority": "high" }))
            .await
            .unwrap();
        executor.run(exec.id).await.unwrap();
        let entries = logs::list_logs(executor.pool(), exec.id).await.unwrap();
        paths.push(node_ids(&entries).join(","));
    }

    assert!(paths.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn completed_logs_trace_a_path_along_graph_edges() {
    let (executor, _mock) = fixture().await;
    let def = onboarding();
    executor.save_definition(&def).await.unwrap();

    for priority in ["high", "low"] {
        let exec = executor
            .fire_manual(&def.id, None, json!({ "employee": "dee", "taskPriority": priority }))
            .await
            .unwrap();
        let id = exec.id;
        executor.run(id).await.unwrap();

        let entries = logs::list_logs(executor.pool(), id).await.unwrap();
        let path: Vec<&str> = entries
            .iter()
            .filter(|e| e.status == NodeStatus::Completed)
            .map(|e| e.node_id.as_str())
            .collect();

        assert!(matches!(&def.nodes[0].kind, crate::NodeKind::Trigger { .. }));
        assert_eq!(path[0], def.nodes[0].id);
        for pair in path.windows(2) {
            assert!(
                def.edges.iter().any(|e| e.source == pair[0] && e.target == pair[1]),
                "no edge {} -> {}",
                pair[0],
                pair[1]
            );
        }
        let last = *path.last().unwrap();
        assert!(!def.edges.iter().any(|e| e.source == last), "{last} is not terminal");
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn condition_without_false_edge_never_creates_an_execution() {
    let (executor, _mock) = fixture().await;
    let mut def = onboarding();
    def.edges.retain(|e| e.branch != Some(Branch::False));
    def.nodes.retain(|n| n.id != "archive");

    let err = executor.save_definition(&def).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(GraphValidationError::MissingBranch { branch: Branch::False, .. })
    ));

    assert!(workflows::list_workflows(executor.pool()).await.unwrap().is_empty());
    assert!(matches!(
        executor.fire_manual("onboarding", None, json!({})).await,
        Err(EngineError::WorkflowNotFound(_))
    ));
    let all = executions::list_executions(executor.pool(), &Default::default()).await.unwrap();
    assert!(all.is_empty());
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handler_failure_fails_the_execution_at_that_node() {
    let (executor, mock) = fixture().await;
    mock.fail(ActionType::SendNotification, "router unavailable");
    let id = fire(&executor, &onboarding(), json!({ "employee": "eve", "taskPriority": "high" })).await;

    let outcome = executor.run(id).await.unwrap();
    let RunOutcome::Failed { node_id, error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(node_id, "notify");
    assert!(error.contains("router unavailable"));

    let entries = logs::list_logs(executor.pool(), id).await.unwrap();
    let (last, earlier) = entries.split_last().unwrap();
    assert_eq!(last.node_id, "notify");
    assert_eq!(last.status, NodeStatus::Failed);
    assert_eq!(last.error.as_deref(), Some(error.as_str()));
    assert!(earlier.iter().all(|e| e.status == NodeStatus::Completed && e.error.is_none()));

    let exec = executions::get_execution(executor.pool(), id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert_eq!(exec.error, Some(error));
    assert_eq!(exec.current_node_id.as_deref(), Some("notify"));
}

#[tokio::test]
async fn slow_handler_times_out_and_fails() {
    let config = ExecutorConfig {
        default_timeout_ms: 5_000,
        action_timeouts_ms: HashMap::from([(ActionType::CreateTask, 50)]),
        ..ExecutorConfig::default()
    };
    let (executor, mock) = fixture_with(config).await;
    mock.stall(ActionType::CreateTask, Duration::from_secs(2));
    let id = fire(&executor, &onboarding(), json!({ "taskPriority": "high" })).await;

    let outcome = executor.run(id).await.unwrap();
    assert!(matches!(&outcome, RunOutcome::Failed { node_id, error }
        if node_id == "create" && error.contains("timed out")));
}

#[tokio::test]
async fn finished_execution_is_not_run_again() {
    let (executor, mock) = fixture().await;
    let id = fire(&executor, &onboarding(), json!({ "taskPriority": "low" })).await;
    executor.run(id).await.unwrap();
    let calls = mock.calls().len();

    assert!(matches!(executor.run(id).await.unwrap(), RunOutcome::Completed { .. }));
    assert_eq!(mock.calls().len(), calls);
    assert_eq!(logs::list_logs(executor.pool(), id).await.unwrap().len(), 4);
}

// ---------------------------------------------------------------------------
// Waits and resumption
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duration_wait_suspends_until_due() {
    let (executor, mock) = fixture().await;
    let before = Utc::now();
    let id = fire(&executor, &waiting(two_days()), json!({})).await;

    let RunOutcome::Suspended(ticket) = executor.run(id).await.unwrap() else {
        panic!("expected suspension");
    };
    let WakeCondition::Timer { resolved_at } = ticket.wake else {
        panic!("expected a timer ticket");
    };
    assert!(resolved_at >= before + chrono::Duration::days(2));
    assert!(resolved_at <= Utc::now() + chrono::Duration::days(2));

    let exec = executions::get_execution(executor.pool(), id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Waiting);
    assert_eq!(exec.current_node_id.as_deref(), Some("pause"));
    assert_eq!(mock.call_count(ActionType::CreateTask), 0);

    // Too early: nothing moves.
    let early = executor.resume_ticket(&ticket, Utc::now()).await;
    assert!(matches!(early, Err(EngineError::TicketNotDue(_))));
    assert_eq!(
        executions::current_status(executor.pool(), id).await.unwrap(),
        ExecutionStatus::Waiting
    );

    let late = resolved_at + chrono::Duration::seconds(1);
    let outcome = executor.resume_ticket(&ticket, late).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Completed { .. }));
    assert!(tickets::get_ticket(executor.pool(), id).await.unwrap().is_none());
    assert_eq!(mock.call_count(ActionType::CreateTask), 1);

    let entries = logs::list_logs(executor.pool(), id).await.unwrap();
    assert_eq!(node_ids(&entries), ["start", "pause", "after"]);
    assert!(entries.iter().all(|e| e.status == NodeStatus::Completed));
}

#[tokio::test]
async fn racing_resumes_advance_past_the_wait_once() {
    let (executor, mock) = fixture().await;
    let until = Utc::now() - chrono::Duration::minutes(1);
    let id = fire(&executor, &waiting(WaitSpec::UntilDate { until }), json!({})).await;

    let RunOutcome::Suspended(ticket) = executor.run(id).await.unwrap() else {
        panic!("expected suspension");
    };

    let now = Utc::now();
    let (a, b) = tokio::join!(
        {
            let executor = executor.clone();
            let ticket = ticket.clone();
            async move { executor.resume_ticket(&ticket, now).await }
        },
        {
            let executor = executor.clone();
            let ticket = ticket.clone();
            async move { executor.resume_ticket(&ticket, now).await }
        }
    );

    let results = [a, b];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(EngineError::ClaimConflict(_))))
        .count();
    assert_eq!((wins, conflicts), (1, 1));
    assert_eq!(mock.call_count(ActionType::CreateTask), 1);

    let entries = logs::list_logs(executor.pool(), id).await.unwrap();
    assert_eq!(entries.iter().filter(|e| e.node_id == "after").count(), 1);
}

#[tokio::test]
async fn approval_decision_is_merged_for_later_conditions() {
    let (executor, mock) = fixture().await;
    let def = WorkflowDefinition::new(
        "leave",
        vec![
            N::trigger("start", TriggerSpec::Manual),
            N::wait("review", WaitSpec::Approval { approver: Some("manager".into()), message: None }),
            N::condition("approved", "review.approved == true"),
            N::action(
                "confirm",
                ActionType::SendEmail,
                json!({ "to": "{{requester}}", "subject": "Approved", "body": "{{review.comment}}" }),
            ),
            N::action("reject", ActionType::SendEmail, json!({ "to": "{{requester}}", "subject": "No", "body": "-" })),
        ],
        vec![
            E::new("start", "review"),
            E::new("review", "approved"),
            E::branch("approved", "confirm", Branch::True),
            E::branch("approved", "reject", Branch::False),
        ],
    );
    let id = fire(&executor, &def, json!({ "requester": "sam@example.com" })).await;

    let RunOutcome::Suspended(ticket) = executor.run(id).await.unwrap() else {
        panic!("expected suspension");
    };
    let WakeCondition::Approval { token, decision: None } = &ticket.wake else {
        panic!("expected an undecided approval");
    };
    assert!(matches!(
        executor.resume_ticket(&ticket, Utc::now()).await,
        Err(EngineError::TicketNotDue(_))
    ));

    let decided = executor.approve(token, true, Some("enjoy".into())).await.unwrap();
    assert!(matches!(
        executor.approve(token, false, None).await,
        Err(EngineError::UnknownApproval(_))
    ));

    let outcome = executor.resume_ticket(&decided, Utc::now()).await.unwrap();
    let RunOutcome::Completed { result } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(result["review"]["approved"], true);
    assert_eq!(result["review"]["comment"], "enjoy");

    let calls = mock.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1["subject"], "Approved");
    assert_eq!(calls[0].1["body"], "enjoy");
}

// ---------------------------------------------------------------------------
// External control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn paused_execution_stops_at_the_next_boundary() {
    let (executor, mock) = fixture().await;
    mock.stall(ActionType::CreateTask, Duration::from_millis(300));
    let id = fire(&executor, &onboarding(), json!({ "taskPriority": "high" })).await;

    let running = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run(id).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    executor.pause(id).await.unwrap();

    assert_eq!(running.await.unwrap().unwrap(), RunOutcome::Paused);
    let exec = executions::get_execution(executor.pool(), id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Paused);
    // The in-flight node finished and its cursor was kept.
    assert_eq!(exec.current_node_id.as_deref(), Some("check"));

    assert!(matches!(executor.pause(id).await, Err(EngineError::InvalidTransition { .. })));

    executor.resume_paused(id).await.unwrap();
    assert!(matches!(executor.run(id).await.unwrap(), RunOutcome::Completed { .. }));
    assert_eq!(mock.call_count(ActionType::CreateTask), 1);
}

#[tokio::test]
async fn failure_while_a_pause_is_pending_still_fails_the_execution() {
    let (executor, mock) = fixture().await;
    mock.stall(ActionType::CreateTask, Duration::from_millis(300));
    mock.fail(ActionType::CreateTask, "task store offline");
    let id = fire(&executor, &onboarding(), json!({ "taskPriority": "high" })).await;

    let running = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run(id).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    executor.pause(id).await.unwrap();

    let outcome = running.await.unwrap().unwrap();
    assert!(matches!(&outcome, RunOutcome::Failed { node_id, error }
        if node_id == "create" && error.contains("task store offline")));

    let exec = executions::get_execution(executor.pool(), id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Failed);
    assert!(exec.error.as_deref().is_some_and(|e| e.contains("task store offline")));

    // Nothing left to resume, so the action is never attempted again.
    assert!(matches!(executor.resume_paused(id).await, Err(EngineError::InvalidTransition { .. })));
    assert!(matches!(executor.run(id).await.unwrap(), RunOutcome::Failed { .. }));
    assert_eq!(mock.call_count(ActionType::CreateTask), 1);
}

#[tokio::test]
async fn cancelling_a_waiting_execution_drops_its_ticket() {
    let (executor, mock) = fixture().await;
    let id = fire(&executor, &waiting(two_days()), json!({})).await;
    let RunOutcome::Suspended(ticket) = executor.run(id).await.unwrap() else {
        panic!("expected suspension");
    };

    executor.cancel(id).await.unwrap();
    assert!(tickets::get_ticket(executor.pool(), id).await.unwrap().is_none());
    let entries = logs::list_logs(executor.pool(), id).await.unwrap();
    assert_eq!(node_ids(&entries), ["start", "pause"]);
    assert_eq!(entries[1].status, NodeStatus::Skipped);

    let late = Utc::now() + chrono::Duration::days(3);
    assert!(matches!(
        executor.resume_ticket(&ticket, late).await,
        Err(EngineError::ClaimConflict(_))
    ));
    assert_eq!(executor.run(id).await.unwrap(), RunOutcome::Cancelled);
    assert_eq!(mock.call_count(ActionType::CreateTask), 0);

    assert!(matches!(executor.cancel(id).await, Err(EngineError::InvalidTransition { .. })));
}

#[tokio::test]
async fn a_second_concurrent_run_is_refused() {
    let (executor, mock) = fixture().await;
    mock.stall(ActionType::CreateTask, Duration::from_millis(300));
    let id = fire(&executor, &onboarding(), json!({ "taskPriority": "low" })).await;

    let first = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run(id).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(executor.run(id).await, Err(EngineError::AlreadyRunning(_))));
    assert!(matches!(first.await.unwrap().unwrap(), RunOutcome::Completed { .. }));
    assert_eq!(mock.call_count(ActionType::CreateTask), 1);
}

#[tokio::test]
async fn executors_sharing_a_database_never_run_the_same_execution_twice() {
    let (executor, mock) = fixture().await;
    mock.stall(ActionType::CreateTask, Duration::from_millis(300));
    let id = fire(&executor, &onboarding(), json!({ "taskPriority": "low" })).await;
    // Another process pointed at the same database.
    let other = Arc::new(WorkflowExecutor::new(
        executor.pool().clone(),
        mock.collaborators(),
        ExecutorConfig::default(),
    ));

    let first = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run(id).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(matches!(other.run(id).await, Err(EngineError::AlreadyRunning(_))));
    assert!(matches!(first.await.unwrap().unwrap(), RunOutcome::Completed { .. }));
    assert_eq!(mock.call_count(ActionType::CreateTask), 1);

    // Once the lease is released the other executor just sees the result.
    assert!(matches!(other.run(id).await.unwrap(), RunOutcome::Completed { .. }));
}

#[tokio::test]
async fn expired_lease_is_taken_over_and_the_old_owner_stops() {
    let config = ExecutorConfig { lease_ms: 100, ..ExecutorConfig::default() };
    let (executor, mock) = fixture_with(config.clone()).await;
    mock.stall(ActionType::CreateTask, Duration::from_millis(400));
    let id = fire(&executor, &onboarding(), json!({ "taskPriority": "low" })).await;
    let other = Arc::new(WorkflowExecutor::new(executor.pool().clone(), mock.collaborators(), config));

    let first = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run(id).await }
    });
    // The first owner is stuck in create_task well past its lease.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let second = tokio::spawn({
        let other = other.clone();
        async move { other.run(id).await }
    });

    assert!(matches!(first.await.unwrap(), Err(EngineError::AlreadyRunning(_))));
    assert!(matches!(second.await.unwrap().unwrap(), RunOutcome::Completed { .. }));

    // Only the new owner's step is recorded as the path taken.
    let entries = logs::list_logs(executor.pool(), id).await.unwrap();
    let completed: Vec<&str> = entries
        .iter()
        .filter(|e| e.status == NodeStatus::Completed)
        .map(|e| e.node_id.as_str())
        .collect();
    assert_eq!(completed.iter().filter(|n| **n == "check").count(), 1);
}

// ---------------------------------------------------------------------------
// Shutdown and recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn interrupted_run_is_picked_up_where_it_stopped() {
    let (executor, mock) = fixture().await;
    mock.stall(ActionType::CreateTask, Duration::from_millis(500));
    let id = fire(&executor, &onboarding(), json!({ "taskPriority": "low" })).await;

    let running = tokio::spawn({
        let executor = executor.clone();
        async move { executor.run(id).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    executor.shutdown();
    assert_eq!(running.await.unwrap().unwrap(), RunOutcome::Interrupted);

    let exec = executions::get_execution(executor.pool(), id).await.unwrap();
    assert_eq!(exec.status, ExecutionStatus::Running);
    assert_eq!(exec.current_node_id.as_deref(), Some("create"));

    // A fresh process on the same database.
    let restarted = WorkflowExecutor::new(
        executor.pool().clone(),
        mock.collaborators(),
        ExecutorConfig::default(),
    );
    assert!(matches!(restarted.run(id).await.unwrap(), RunOutcome::Completed { .. }));

    let entries = logs::list_logs(executor.pool(), id).await.unwrap();
    let create: Vec<NodeStatus> =
        entries.iter().filter(|e| e.node_id == "create").map(|e| e.status).collect();
    // The abandoned attempt stays in the trail.
    assert_eq!(create, [NodeStatus::Running, NodeStatus::Completed]);
    assert_eq!(mock.call_count(ActionType::CreateTask), 2);
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn event_fans_out_to_every_listening_workflow() {
    let (executor, _mock) = fixture().await;
    let listener = |id: &str, event: &str| {
        WorkflowDefinition::new(
            id,
            vec![
                N::trigger("on", TriggerSpec::Event { event: event.into() }),
                N::action("task", ActionType::CreateTask, json!({ "title": "{{name}}" })),
            ],
            vec![E::new("on", "task")],
        )
    };
    executor.save_definition(&listener("welcome", "employee.created")).await.unwrap();
    executor.save_definition(&listener("equipment", "employee.created")).await.unwrap();
    executor.save_definition(&listener("offboard", "employee.left")).await.unwrap();

    let started = executor.fire_event("employee.created", json!({ "name": "kim" })).await.unwrap();
    let mut ids: Vec<&str> = started.iter().map(|e| e.workflow_id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, ["equipment", "welcome"]);
    assert!(started.iter().all(|e| e.context["_trigger"]["event"] == "employee.created"));

    // Each firing is independent.
    let again = executor.fire_event("employee.created", json!({ "name": "kim" })).await.unwrap();
    assert_eq!(again.len(), 2);
    assert!(again.iter().all(|e| started.iter().all(|s| s.id != e.id)));

    assert!(executor.fire_event("nobody.listens", json!({})).await.unwrap().is_empty());
}

#[tokio::test]
async fn manual_firing_needs_a_manual_trigger() {
    let (executor, _mock) = fixture().await;
    let def = WorkflowDefinition::new(
        "cron-only",
        vec![
            N::trigger("tick", TriggerSpec::Schedule { cron: "0 0 9 * * Mon-Fri".into() }),
            N::action("task", ActionType::CreateTask, json!({ "title": "standup" })),
        ],
        vec![E::new("tick", "task")],
    );
    executor.save_definition(&def).await.unwrap();

    assert!(matches!(
        executor.fire_manual("cron-only", None, json!({})).await,
        Err(EngineError::NoMatchingTrigger { .. })
    ));
    assert!(matches!(
        executor.fire_manual("cron-only", Some("task"), json!({})).await,
        Err(EngineError::NoMatchingTrigger { .. })
    ));

    let graph = executor.latest_graph("cron-only").await.unwrap();
    let exec = executor.fire_schedule(&graph, "tick", Utc::now()).await.unwrap();
    assert_eq!(exec.trigger_node_id, "tick");
    assert_eq!(exec.context["_trigger"]["type"], "schedule");
}

#[tokio::test]
async fn payload_keys_cannot_shadow_node_outputs() {
    let (executor, _mock) = fixture().await;
    executor.save_definition(&onboarding()).await.unwrap();

    let clash = executor.fire_manual("onboarding", None, json!({ "create": "mine", "taskPriority": "high" })).await;
    assert!(matches!(clash, Err(EngineError::ReservedContextKey { key, .. }) if key == "create"));

    let all = executions::list_executions(executor.pool(), &Default::default()).await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn placeholder_in_a_numeric_parameter_is_accepted_and_filled() {
    let (executor, mock) = fixture().await;
    let def = WorkflowDefinition::new(
        "deadline",
        vec![
            N::trigger("start", TriggerSpec::Manual),
            N::action("task", ActionType::CreateTask, json!({ "title": "file report", "due_in_days": "{{days}}" })),
        ],
        vec![E::new("start", "task")],
    );
    let id = fire(&executor, &def, json!({ "days": 5 })).await;

    assert!(matches!(executor.run(id).await.unwrap(), RunOutcome::Completed { .. }));
    assert!(mock.calls()[0].1["due_date"].is_string());
}
