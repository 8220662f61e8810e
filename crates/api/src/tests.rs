use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use db::pool::memory_pool;
use engine::{ExecutorConfig, WorkflowExecutor};
use nodes::mock::RecordingCollaborators;
use nodes::ActionType;
use scheduler::WorkerPool;

use crate::{router, AppState};

async fn test_app() -> (Router, Arc<RecordingCollaborators>) {
    let pool = memory_pool().await.unwrap();
    let mock = RecordingCollaborators::new();
    let executor = Arc::new(WorkflowExecutor::new(pool, mock.collaborators(), ExecutorConfig::default()));
    (router(AppState::new(WorkerPool::new(executor, 2))), mock)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

/// Poll the execution until it leaves `running`.
async fn settle(app: &Router, id: &str) -> Value {
    for _ in 0..100 {
        let (status, body) = send(app, "GET", &format!("/api/v1/executions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if body["status"] != "running" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("execution {id} never settled");
}

fn onboarding() -> Value {
    json!({
        "id": "onboarding",
        "name": "Employee onboarding",
        "nodes": [
            { "id": "start", "label": "Start", "kind": "trigger", "trigger": { "type": "manual" } },
            { "id": "create", "label": "Create task", "kind": "action", "action_type": "create_task",
              "parameters": { "title": "Onboard {{employee}}" } },
            { "id": "check", "label": "High priority?", "kind": "condition",
              "expression": "taskPriority == \"high\"" },
            { "id": "notify", "label": "Notify HR", "kind": "action", "action_type": "send_notification",
              "parameters": { "recipient": "hr", "title": "New hire", "message": "{{employee}}" } },
            { "id": "review", "label": "Manager review", "kind": "wait",
              "wait": { "wait_type": "approval", "approver": "manager" } }
        ],
        "edges": [
            { "source": "start", "target": "create" },
            { "source": "create", "target": "check" },
            { "source": "check", "target": "notify", "branch": "true" },
            { "source": "check", "target": "review", "branch": "false" }
        ]
    })
}

#[tokio::test]
async fn stores_and_lists_workflows() {
    let (app, _mock) = test_app().await;

    let (status, body) = send(&app, "POST", "/api/v1/workflows", Some(onboarding())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"], 1);

    let (status, body) = send(&app, "GET", "/api/v1/workflows", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = send(&app, "GET", "/api/v1/workflows/onboarding", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["definition"]["nodes"].as_array().unwrap().len(), 5);

    let (status, _) = send(&app, "GET", "/api/v1/workflows/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Definitions are immutable once stored.
    let (status, _) = send(&app, "POST", "/api/v1/workflows", Some(onboarding())).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn rejects_invalid_definitions() {
    let (app, _mock) = test_app().await;

    let mut missing_branch = onboarding();
    missing_branch["edges"].as_array_mut().unwrap().pop();
    let (status, body) = send(&app, "POST", "/api/v1/workflows", Some(missing_branch)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("'false'"));

    let mut unknown_action = onboarding();
    unknown_action["nodes"][1]["action_type"] = json!("launch_rocket");
    let (status, _) = send(&app, "POST", "/api/v1/workflows", Some(unknown_action)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (_, body) = send(&app, "GET", "/api/v1/workflows", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn manual_execution_runs_to_completion() {
    let (app, mock) = test_app().await;
    send(&app, "POST", "/api/v1/workflows", Some(onboarding())).await;

    let input = json!({ "input": { "employee": "ada", "taskPriority": "high" } });
    let (status, body) = send(&app, "POST", "/api/v1/workflows/onboarding/execute", Some(input)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().unwrap().to_owned();

    let detail = settle(&app, &id).await;
    assert_eq!(detail["status"], "completed");
    assert!(detail["duration_ms"].is_i64());

    let (status, logs) = send(&app, "GET", &format!("/api/v1/executions/{id}/logs"), None).await;
    assert_eq!(status, StatusCode::OK);
    let nodes: Vec<&str> = logs.as_array().unwrap().iter().map(|l| l["node_id"].as_str().unwrap()).collect();
    assert_eq!(nodes, ["start", "create", "check", "notify"]);
    assert_eq!(mock.call_count(ActionType::SendNotification), 1);

    let (_, list) = send(&app, "GET", "/api/v1/executions?status=completed", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    let (_, list) = send(&app, "GET", "/api/v1/executions?status=failed", None).await;
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn approval_flow_over_http() {
    let (app, _mock) = test_app().await;
    send(&app, "POST", "/api/v1/workflows", Some(onboarding())).await;

    let input = json!({ "input": { "employee": "bob", "taskPriority": "low" } });
    let (_, body) = send(&app, "POST", "/api/v1/workflows/onboarding/execute", Some(input)).await;
    let id = body["id"].as_str().unwrap().to_owned();

    let detail = settle(&app, &id).await;
    assert_eq!(detail["status"], "waiting");
    assert_eq!(detail["current_node_id"], "review");
    let token = detail["wait"]["wake"]["token"].as_str().unwrap().to_owned();

    let (status, _) = send(&app, "POST", "/api/v1/approvals/not-a-token", Some(json!({ "approved": true }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let decision = json!({ "approved": false, "comment": "not yet" });
    let (status, ticket) = send(&app, "POST", &format!("/api/v1/approvals/{token}"), Some(decision.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ticket["wake"]["decision"]["approved"], false);

    // Only the first decision counts.
    let (status, _) = send(&app, "POST", &format!("/api/v1/approvals/{token}"), Some(decision)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn control_endpoints_enforce_the_state_machine() {
    let (app, _mock) = test_app().await;
    send(&app, "POST", "/api/v1/workflows", Some(onboarding())).await;

    let input = json!({ "input": { "taskPriority": "low" } });
    let (_, body) = send(&app, "POST", "/api/v1/workflows/onboarding/execute", Some(input)).await;
    let id = body["id"].as_str().unwrap().to_owned();
    assert_eq!(settle(&app, &id).await["status"], "waiting");

    let (status, _) = send(&app, "POST", &format!("/api/v1/executions/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "POST", &format!("/api/v1/executions/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(settle(&app, &id).await["status"], "cancelled");

    let (status, _) = send(&app, "POST", &format!("/api/v1/executions/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let missing = uuid::Uuid::new_v4();
    let (status, _) = send(&app, "GET", &format!("/api/v1/executions/{missing}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", &format!("/api/v1/executions/{missing}/logs"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn events_without_listeners_are_accepted() {
    let (app, _mock) = test_app().await;

    let (status, body) = send(&app, "POST", "/api/v1/events/employee.created", Some(json!({ "id": 1 }))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["executions"], json!([]));

    let (status, _) = send(&app, "POST", "/api/v1/workflows/nope/execute", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
