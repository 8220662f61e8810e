//! The closed set of action types.

use serde::{Deserialize, Serialize};

/// Every side effect a workflow can perform.  Unknown names fail to
/// deserialize, so an unsupported action is caught when the definition is
/// parsed rather than when the node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendEmail,
    CreateTask,
    CreateTasks,
    UpdateDatabase,
    GenerateDocument,
    SendNotification,
    CallWebhook,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        Self::SendEmail,
        Self::CreateTask,
        Self::CreateTasks,
        Self::UpdateDatabase,
        Self::GenerateDocument,
        Self::SendNotification,
        Self::CallWebhook,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendEmail => "send_email",
            Self::CreateTask => "create_task",
            Self::CreateTasks => "create_tasks",
            Self::UpdateDatabase => "update_database",
            Self::GenerateDocument => "generate_document",
            Self::SendNotification => "send_notification",
            Self::CallWebhook => "call_webhook",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
