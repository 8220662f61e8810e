//! `RecordingCollaborators` — a test double for every external collaborator.
//!
//! Records each request it receives (tagged with the action type whose
//! capability was used) and can be told to fail or stall per capability.
//! Batch task creation is recorded under [`ActionType::CreateTask`] because
//! it goes through the same task store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::collaborators::{
    Collaborators, DocumentRequest, DocumentService, EmailSender, GeneratedDocument, NewTask,
    Notification, NotificationRouter, OutboundEmail, RecordStore, RecordUpdate, TaskStore,
    WebhookCaller, WebhookRequest, WebhookResponse,
};
use crate::params::Channel;
use crate::{ActionType, NodeError};

#[derive(Default)]
pub struct RecordingCollaborators {
    calls: Mutex<Vec<(ActionType, Value)>>,
    failures: Mutex<HashMap<ActionType, String>>,
    stalls: Mutex<HashMap<ActionType, Duration>>,
}

impl RecordingCollaborators {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A bundle where every capability is this recorder.
    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators {
            email: self.clone(),
            tasks: self.clone(),
            records: self.clone(),
            documents: self.clone(),
            notifications: self.clone(),
            webhooks: self.clone(),
        }
    }

    /// Make every call through `action`'s capability fail with `message`.
    pub fn fail(&self, action: ActionType, message: impl Into<String>) {
        self.failures.lock().unwrap().insert(action, message.into());
    }

    /// Make every call through `action`'s capability sleep first.
    pub fn stall(&self, action: ActionType, delay: Duration) {
        self.stalls.lock().unwrap().insert(action, delay);
    }

    /// All requests seen so far, in call order.
    pub fn calls(&self) -> Vec<(ActionType, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, action: ActionType) -> usize {
        self.calls.lock().unwrap().iter().filter(|(a, _)| *a == action).count()
    }

    async fn record(&self, action: ActionType, request: &(impl Serialize + Sync)) -> Result<(), NodeError> {
        let payload = serde_json::to_value(request).unwrap_or(Value::Null);
        self.calls.lock().unwrap().push((action, payload));

        let stall = self.stalls.lock().unwrap().get(&action).copied();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let failure = self.failures.lock().unwrap().get(&action).cloned();
        match failure {
            Some(message) => Err(NodeError::Rejected { collaborator: action.as_str(), message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EmailSender for RecordingCollaborators {
    async fn send(&self, email: &OutboundEmail) -> Result<String, NodeError> {
        self.record(ActionType::SendEmail, email).await?;
        Ok(format!("msg-{}", self.call_count(ActionType::SendEmail)))
    }
}

#[async_trait]
impl TaskStore for RecordingCollaborators {
    async fn create_task(&self, task: &NewTask) -> Result<String, NodeError> {
        self.record(ActionType::CreateTask, task).await?;
        Ok(format!("task-{}", self.call_count(ActionType::CreateTask)))
    }
}

#[async_trait]
impl RecordStore for RecordingCollaborators {
    async fn update_record(&self, update: &RecordUpdate) -> Result<Value, NodeError> {
        self.record(ActionType::UpdateDatabase, update).await?;
        Ok(json!({ "id": update.record_id, "fields": update.fields }))
    }
}

#[async_trait]
impl DocumentService for RecordingCollaborators {
    async fn generate(&self, request: &DocumentRequest) -> Result<GeneratedDocument, NodeError> {
        self.record(ActionType::GenerateDocument, request).await?;
        Ok(GeneratedDocument {
            document_id: format!("doc-{}", self.call_count(ActionType::GenerateDocument)),
            url: Some("https://docs.example.com/generated".into()),
        })
    }
}

#[async_trait]
impl NotificationRouter for RecordingCollaborators {
    async fn notify(&self, notification: &Notification) -> Result<Vec<Channel>, NodeError> {
        self.record(ActionType::SendNotification, notification).await?;
        Ok(notification.channels.clone())
    }
}

#[async_trait]
impl WebhookCaller for RecordingCollaborators {
    async fn call(&self, request: &WebhookRequest) -> Result<WebhookResponse, NodeError> {
        self.record(ActionType::CallWebhook, request).await?;
        Ok(WebhookResponse { status: 200, body: json!({ "ok": true }) })
    }
}
