//! Typed parameters for each action type.
//!
//! Definitions carry parameters as free-form JSON; they are checked against
//! these shapes when the workflow is validated and parsed again (after
//! templating) when the node runs.  Non-string fields are [`Templated`], so
//! a lone `{{path}}` passes validation and is filled in at run time.

use std::collections::BTreeMap;

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{template, ActionType, NodeError};

/// A typed field, or a whole-string placeholder standing in for it until
/// the node runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Templated<T> {
    Literal(T),
    Placeholder(String),
}

impl<T> Templated<T> {
    /// The literal value.  A placeholder still present here rendered to
    /// another placeholder, which is a parameter error.
    pub fn resolve(self, field: &str) -> Result<T, NodeError> {
        match self {
            Self::Literal(value) => Ok(value),
            Self::Placeholder(raw) => {
                Err(NodeError::InvalidParameters(format!("{field}: unresolved placeholder '{raw}'")))
            }
        }
    }
}

impl<T: Default> Default for Templated<T> {
    fn default() -> Self {
        Self::Literal(T::default())
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Templated<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if let Value::String(s) = &value {
            if template::is_whole_placeholder(s) {
                return Ok(Self::Placeholder(s.clone()));
            }
        }
        T::deserialize(value).map(Self::Literal).map_err(de::Error::custom)
    }
}

/// Accepts either `"a@x"` or `["a@x", "b@x"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendEmailParams {
    pub to: OneOrMany,
    #[serde(default)]
    pub cc: Templated<Vec<String>>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTaskParams {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    /// Due date relative to the moment the task is created.
    #[serde(default)]
    pub due_in_days: Option<Templated<i64>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTasksParams {
    pub tasks: Templated<Vec<CreateTaskParams>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateDatabaseParams {
    pub table: String,
    pub record_id: String,
    pub fields: Templated<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateDocumentParams {
    pub template: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Data merged into the template; defaults to the whole context.
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    InApp,
    Email,
    Sms,
    Push,
}

fn default_channels() -> Templated<Vec<Channel>> {
    Templated::Literal(vec![Channel::InApp])
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendNotificationParams {
    pub recipient: String,
    pub title: String,
    pub message: String,
    #[serde(default = "default_channels")]
    pub channels: Templated<Vec<Channel>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallWebhookParams {
    pub url: String,
    #[serde(default)]
    pub method: Templated<HttpMethod>,
    #[serde(default)]
    pub headers: Templated<BTreeMap<String, String>>,
    /// Request body; defaults to the whole context.
    #[serde(default)]
    pub payload: Option<Value>,
}

pub(crate) fn parse<T: DeserializeOwned>(action: ActionType, params: &Value) -> Result<T, NodeError> {
    // Absent parameters are treated as an empty object so the error names
    // the missing field instead of complaining about `null`.
    let params = if params.is_null() { Value::Object(Map::new()) } else { params.clone() };
    serde_json::from_value(params)
        .map_err(|e| NodeError::InvalidParameters(format!("{action}: {e}")))
}

/// Check `params` against the shape `action` expects.
pub fn validate_parameters(action: ActionType, params: &Value) -> Result<(), NodeError> {
    match action {
        ActionType::SendEmail => parse::<SendEmailParams>(action, params).map(drop),
        ActionType::CreateTask => parse::<CreateTaskParams>(action, params).map(drop),
        ActionType::CreateTasks => parse::<CreateTasksParams>(action, params).map(drop),
        ActionType::UpdateDatabase => parse::<UpdateDatabaseParams>(action, params).map(drop),
        ActionType::GenerateDocument => parse::<GenerateDocumentParams>(action, params).map(drop),
        ActionType::SendNotification => parse::<SendNotificationParams>(action, params).map(drop),
        ActionType::CallWebhook => {
            let parsed = parse::<CallWebhookParams>(action, params)?;
            if !(parsed.url.starts_with("http://")
                || parsed.url.starts_with("https://")
                || parsed.url.starts_with("{{"))
            {
                return Err(NodeError::InvalidParameters(format!(
                    "call_webhook: url must be http(s), got '{}'",
                    parsed.url
                )));
            }
            Ok(())
        }
    }
}
