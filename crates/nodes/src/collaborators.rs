//! External systems the action handlers delegate to.
//!
//! Each trait is one narrow capability.  The engine is wired with a
//! [`Collaborators`] bundle; production deployments plug in real
//! implementations, the CLI uses [`TracingOutbox`] plus a real HTTP
//! [`HttpWebhookCaller`], and tests use [`crate::mock::RecordingCollaborators`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::params::{Channel, HttpMethod};
use crate::NodeError;

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub assignee: Option<String>,
    pub priority: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    /// Execution that created the task, for traceability.
    pub execution_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub table: String,
    pub record_id: String,
    pub fields: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub template: String,
    pub title: Option<String>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub document_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: String,
    pub title: String,
    pub message: String,
    pub channels: Vec<Channel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRequest {
    pub url: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Returns the provider's message id.
    async fn send(&self, email: &OutboundEmail) -> Result<String, NodeError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Returns the id of the created task.
    async fn create_task(&self, task: &NewTask) -> Result<String, NodeError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Returns the record as it looks after the update.
    async fn update_record(&self, update: &RecordUpdate) -> Result<Value, NodeError>;
}

#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn generate(&self, request: &DocumentRequest) -> Result<GeneratedDocument, NodeError>;
}

#[async_trait]
pub trait NotificationRouter: Send + Sync {
    /// Returns the channels the notification was actually delivered on.
    async fn notify(&self, notification: &Notification) -> Result<Vec<Channel>, NodeError>;
}

#[async_trait]
pub trait WebhookCaller: Send + Sync {
    async fn call(&self, request: &WebhookRequest) -> Result<WebhookResponse, NodeError>;
}

/// The full set of collaborators one engine instance talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub email: Arc<dyn EmailSender>,
    pub tasks: Arc<dyn TaskStore>,
    pub records: Arc<dyn RecordStore>,
    pub documents: Arc<dyn DocumentService>,
    pub notifications: Arc<dyn NotificationRouter>,
    pub webhooks: Arc<dyn WebhookCaller>,
}

impl Collaborators {
    /// Log-only collaborators with a real HTTP webhook caller.
    pub fn local() -> Self {
        let outbox = Arc::new(TracingOutbox);
        Self {
            email: outbox.clone(),
            tasks: outbox.clone(),
            records: outbox.clone(),
            documents: outbox.clone(),
            notifications: outbox,
            webhooks: Arc::new(HttpWebhookCaller::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// TracingOutbox
// ---------------------------------------------------------------------------

/// Accepts every request, logs it, and answers with a generated id.
///
/// Stands in for the mail server, task store, record store, document
/// service and notification router when the engine runs on its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutbox;

#[async_trait]
impl EmailSender for TracingOutbox {
    async fn send(&self, email: &OutboundEmail) -> Result<String, NodeError> {
        info!(to = ?email.to, subject = %email.subject, "outbox: email");
        Ok(format!("msg-{}", Uuid::new_v4()))
    }
}

#[async_trait]
impl TaskStore for TracingOutbox {
    async fn create_task(&self, task: &NewTask) -> Result<String, NodeError> {
        info!(title = %task.title, assignee = ?task.assignee, "outbox: task");
        Ok(format!("task-{}", Uuid::new_v4()))
    }
}

#[async_trait]
impl RecordStore for TracingOutbox {
    async fn update_record(&self, update: &RecordUpdate) -> Result<Value, NodeError> {
        info!(table = %update.table, record_id = %update.record_id, "outbox: record update");
        let mut record = update.fields.clone();
        record.insert("id".into(), json!(update.record_id));
        Ok(Value::Object(record))
    }
}

#[async_trait]
impl DocumentService for TracingOutbox {
    async fn generate(&self, request: &DocumentRequest) -> Result<GeneratedDocument, NodeError> {
        info!(template = %request.template, "outbox: document");
        Ok(GeneratedDocument { document_id: format!("doc-{}", Uuid::new_v4()), url: None })
    }
}

#[async_trait]
impl NotificationRouter for TracingOutbox {
    async fn notify(&self, notification: &Notification) -> Result<Vec<Channel>, NodeError> {
        info!(
            recipient = %notification.recipient,
            channels = ?notification.channels,
            "outbox: notification"
        );
        Ok(notification.channels.clone())
    }
}

// ---------------------------------------------------------------------------
// HttpWebhookCaller
// ---------------------------------------------------------------------------

/// Outbound webhook calls over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpWebhookCaller {
    client: reqwest::Client,
}

impl HttpWebhookCaller {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookCaller for HttpWebhookCaller {
    async fn call(&self, request: &WebhookRequest) -> Result<WebhookResponse, NodeError> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.method != HttpMethod::Get {
            builder = builder.json(&request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::Transport(e.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            return Err(NodeError::Rejected {
                collaborator: "webhook",
                message: format!("{} returned {status}: {body}", request.url),
            });
        }

        Ok(WebhookResponse { status: status.as_u16(), body })
    }
}
