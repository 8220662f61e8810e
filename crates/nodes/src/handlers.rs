//! The `ActionHandler` trait and one implementation per [`ActionType`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::collaborators::{
    Collaborators, DocumentRequest, DocumentService, EmailSender, NewTask, Notification,
    NotificationRouter, OutboundEmail, RecordStore, RecordUpdate, TaskStore, WebhookCaller,
    WebhookRequest,
};
use crate::params::{
    parse, CallWebhookParams, CreateTaskParams, CreateTasksParams, GenerateDocumentParams,
    SendEmailParams, SendNotificationParams, UpdateDatabaseParams,
};
use crate::{template, ActionType, NodeError};

/// What a handler may know about the run that invoked it.
///
/// Defined here (in the nodes crate) so both the engine and individual
/// handlers can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub execution_id: Uuid,
    pub node_id: String,
    /// Snapshot of the execution context at the time of the call.
    pub data: Map<String, Value>,
}

/// The contract every action handler fulfils.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// Run the action.  `params` are the node's raw parameters; handlers
    /// render `{{placeholders}}` against `ctx.data` before use.
    async fn execute(&self, params: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError>;
}

fn rendered<T: serde::de::DeserializeOwned>(
    action: ActionType,
    params: &Value,
    ctx: &ExecutionContext,
) -> Result<T, NodeError> {
    parse(action, &template::render(params, &ctx.data))
}

// ---------------------------------------------------------------------------
// send_email
// ---------------------------------------------------------------------------

pub struct SendEmailHandler {
    sender: Arc<dyn EmailSender>,
}

#[async_trait]
impl ActionHandler for SendEmailHandler {
    fn action_type(&self) -> ActionType {
        ActionType::SendEmail
    }

    async fn execute(&self, params: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let p: SendEmailParams = rendered(self.action_type(), params, ctx)?;
        let email = OutboundEmail {
            to: p.to.into_vec(),
            cc: p.cc.resolve("cc")?,
            subject: p.subject,
            body: p.body,
        };
        let message_id = self.sender.send(&email).await?;
        Ok(json!({ "message_id": message_id, "recipients": email.to }))
    }
}

// ---------------------------------------------------------------------------
// create_task / create_tasks
// ---------------------------------------------------------------------------

fn new_task(p: CreateTaskParams, execution_id: Uuid) -> Result<NewTask, NodeError> {
    let due_in_days = p.due_in_days.map(|days| days.resolve("due_in_days")).transpose()?;
    Ok(NewTask {
        due_date: due_in_days.map(|days| Utc::now() + Duration::days(days)),
        title: p.title,
        description: p.description,
        assignee: p.assignee,
        priority: p.priority,
        execution_id,
    })
}

pub struct CreateTaskHandler {
    store: Arc<dyn TaskStore>,
}

#[async_trait]
impl ActionHandler for CreateTaskHandler {
    fn action_type(&self) -> ActionType {
        ActionType::CreateTask
    }

    async fn execute(&self, params: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let p: CreateTaskParams = rendered(self.action_type(), params, ctx)?;
        let task = new_task(p, ctx.execution_id)?;
        let task_id = self.store.create_task(&task).await?;
        Ok(json!({ "task_id": task_id, "title": task.title, "priority": task.priority }))
    }
}

pub struct CreateTasksHandler {
    store: Arc<dyn TaskStore>,
}

#[async_trait]
impl ActionHandler for CreateTasksHandler {
    fn action_type(&self) -> ActionType {
        ActionType::CreateTasks
    }

    async fn execute(&self, params: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let p: CreateTasksParams = rendered(self.action_type(), params, ctx)?;
        let tasks = p.tasks.resolve("tasks")?;
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(self.store.create_task(&new_task(task, ctx.execution_id)?).await?);
        }
        Ok(json!({ "task_ids": ids, "count": ids.len() }))
    }
}

// ---------------------------------------------------------------------------
// update_database
// ---------------------------------------------------------------------------

pub struct UpdateDatabaseHandler {
    store: Arc<dyn RecordStore>,
}

#[async_trait]
impl ActionHandler for UpdateDatabaseHandler {
    fn action_type(&self) -> ActionType {
        ActionType::UpdateDatabase
    }

    async fn execute(&self, params: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let p: UpdateDatabaseParams = rendered(self.action_type(), params, ctx)?;
        let update = RecordUpdate { table: p.table, record_id: p.record_id, fields: p.fields.resolve("fields")? };
        let record = self.store.update_record(&update).await?;
        Ok(json!({ "table": update.table, "record": record }))
    }
}

// ---------------------------------------------------------------------------
// generate_document
// ---------------------------------------------------------------------------

pub struct GenerateDocumentHandler {
    service: Arc<dyn DocumentService>,
}

#[async_trait]
impl ActionHandler for GenerateDocumentHandler {
    fn action_type(&self) -> ActionType {
        ActionType::GenerateDocument
    }

    async fn execute(&self, params: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let p: GenerateDocumentParams = rendered(self.action_type(), params, ctx)?;
        let request = DocumentRequest {
            template: p.template,
            title: p.title,
            data: p.data.unwrap_or_else(|| Value::Object(ctx.data.clone())),
        };
        let doc = self.service.generate(&request).await?;
        Ok(json!({ "document_id": doc.document_id, "url": doc.url, "template": request.template }))
    }
}

// ---------------------------------------------------------------------------
// send_notification
// ---------------------------------------------------------------------------

pub struct SendNotificationHandler {
    router: Arc<dyn NotificationRouter>,
}

#[async_trait]
impl ActionHandler for SendNotificationHandler {
    fn action_type(&self) -> ActionType {
        ActionType::SendNotification
    }

    async fn execute(&self, params: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let p: SendNotificationParams = rendered(self.action_type(), params, ctx)?;
        let notification = Notification {
            recipient: p.recipient,
            title: p.title,
            message: p.message,
            channels: p.channels.resolve("channels")?,
        };
        let delivered = self.router.notify(&notification).await?;
        Ok(json!({ "recipient": notification.recipient, "delivered": delivered }))
    }
}

// ---------------------------------------------------------------------------
// call_webhook
// ---------------------------------------------------------------------------

pub struct CallWebhookHandler {
    caller: Arc<dyn WebhookCaller>,
}

#[async_trait]
impl ActionHandler for CallWebhookHandler {
    fn action_type(&self) -> ActionType {
        ActionType::CallWebhook
    }

    async fn execute(&self, params: &Value, ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let p: CallWebhookParams = rendered(self.action_type(), params, ctx)?;
        let request = WebhookRequest {
            url: p.url,
            method: p.method.resolve("method")?,
            headers: p.headers.resolve("headers")?,
            body: p.payload.unwrap_or_else(|| Value::Object(ctx.data.clone())),
        };
        debug!(url = %request.url, "calling webhook");
        let response = self.caller.call(&request).await?;
        Ok(json!({ "status": response.status, "body": response.body }))
    }
}

// ---------------------------------------------------------------------------
// HandlerTable
// ---------------------------------------------------------------------------

/// One handler per action type, fixed at construction.  There is no way to
/// register additional handlers.
pub struct HandlerTable {
    send_email: SendEmailHandler,
    create_task: CreateTaskHandler,
    create_tasks: CreateTasksHandler,
    update_database: UpdateDatabaseHandler,
    generate_document: GenerateDocumentHandler,
    send_notification: SendNotificationHandler,
    call_webhook: CallWebhookHandler,
}

impl HandlerTable {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            send_email: SendEmailHandler { sender: collaborators.email },
            create_task: CreateTaskHandler { store: collaborators.tasks.clone() },
            create_tasks: CreateTasksHandler { store: collaborators.tasks },
            update_database: UpdateDatabaseHandler { store: collaborators.records },
            generate_document: GenerateDocumentHandler { service: collaborators.documents },
            send_notification: SendNotificationHandler { router: collaborators.notifications },
            call_webhook: CallWebhookHandler { caller: collaborators.webhooks },
        }
    }

    pub fn get(&self, action: ActionType) -> &dyn ActionHandler {
        match action {
            ActionType::SendEmail => &self.send_email,
            ActionType::CreateTask => &self.create_task,
            ActionType::CreateTasks => &self.create_tasks,
            ActionType::UpdateDatabase => &self.update_database,
            ActionType::GenerateDocument => &self.generate_document,
            ActionType::SendNotification => &self.send_notification,
            ActionType::CallWebhook => &self.call_webhook,
        }
    }
}
