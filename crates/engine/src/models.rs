//! Workflow definition model.
//!
//! These types are what an external graph editor produces.  They are
//! deserialized from (and stored as) JSON and only become executable after
//! [`crate::dag::validate`] accepts them.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use nodes::ActionType;

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// How a trigger node is fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Explicit call with a context payload.
    Manual,
    /// Fired by the scheduler's clock.
    Schedule {
        /// Cron expression with a leading seconds field, e.g. `0 0 9 * * Mon-Fri`.
        cron: String,
    },
    /// Fired when another subsystem publishes the named event.
    Event { event: String },
}

impl TriggerSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Schedule { .. } => "schedule",
            Self::Event { .. } => "event",
        }
    }
}

// ---------------------------------------------------------------------------
// Wait
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

/// What a wait node waits for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "wait_type", rename_all = "snake_case")]
pub enum WaitSpec {
    Duration { amount: u32, unit: DurationUnit },
    UntilDate { until: DateTime<Utc> },
    Approval {
        #[serde(default)]
        approver: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl WaitSpec {
    /// Wake-up instant for timed waits, `None` for approvals.
    ///
    /// Months are calendar months: Jan 31 + 1 month lands on the last day
    /// of February.
    pub fn resolve_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Duration { amount, unit } => {
                let amount = i64::from(*amount);
                match unit {
                    DurationUnit::Minutes => Some(now + chrono::Duration::minutes(amount)),
                    DurationUnit::Hours => Some(now + chrono::Duration::hours(amount)),
                    DurationUnit::Days => Some(now + chrono::Duration::days(amount)),
                    DurationUnit::Weeks => Some(now + chrono::Duration::weeks(amount)),
                    DurationUnit::Months => now.checked_add_months(Months::new(amount as u32)),
                }
            }
            Self::UntilDate { until } => Some(*until),
            Self::Approval { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeDefinition
// ---------------------------------------------------------------------------

fn default_true_label() -> String {
    "Yes".into()
}

fn default_false_label() -> String {
    "No".into()
}

/// Kind-specific part of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Trigger {
        trigger: TriggerSpec,
    },
    Action {
        action_type: ActionType,
        #[serde(default)]
        parameters: Value,
    },
    Condition {
        /// Comparison in the restricted grammar of [`crate::condition`].
        expression: String,
        #[serde(default = "default_true_label")]
        true_label: String,
        #[serde(default = "default_false_label")]
        false_label: String,
    },
    Wait {
        wait: WaitSpec,
    },
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this workflow (referenced by edges).
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

// ---------------------------------------------------------------------------
// EdgeDefinition
// ---------------------------------------------------------------------------

/// Which way a condition node went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    True,
    False,
}

impl From<bool> for Branch {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::True => "true",
            Self::False => "false",
        })
    }
}

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    /// Only condition nodes' outgoing edges carry a branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

fn default_version() -> i64 {
    1
}

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: i64,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(
        id: impl Into<String>,
        nodes: Vec<NodeDefinition>,
        edges: Vec<EdgeDefinition>,
    ) -> Self {
        let id = id.into();
        Self { name: id.clone(), id, version: 1, nodes, edges }
    }
}

impl NodeDefinition {
    pub fn trigger(id: &str, trigger: TriggerSpec) -> Self {
        Self { id: id.into(), label: id.into(), kind: NodeKind::Trigger { trigger } }
    }

    pub fn action(id: &str, action_type: ActionType, parameters: Value) -> Self {
        Self { id: id.into(), label: id.into(), kind: NodeKind::Action { action_type, parameters } }
    }

    pub fn condition(id: &str, expression: &str) -> Self {
        Self {
            id: id.into(),
            label: id.into(),
            kind: NodeKind::Condition {
                expression: expression.into(),
                true_label: default_true_label(),
                false_label: default_false_label(),
            },
        }
    }

    pub fn wait(id: &str, wait: WaitSpec) -> Self {
        Self { id: id.into(), label: id.into(), kind: NodeKind::Wait { wait } }
    }
}

impl EdgeDefinition {
    pub fn new(source: &str, target: &str) -> Self {
        Self { source: source.into(), target: target.into(), branch: None }
    }

    pub fn branch(source: &str, target: &str, branch: Branch) -> Self {
        Self { source: source.into(), target: target.into(), branch: Some(branch) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_editor_json() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "id": "onboarding",
            "name": "Employee onboarding",
            "nodes": [
                { "id": "start", "label": "New hire", "kind": "trigger",
                  "trigger": { "type": "event", "event": "employee.created" } },
                { "id": "task", "kind": "action", "action_type": "create_task",
                  "parameters": { "title": "Laptop" } },
                { "id": "check", "kind": "condition", "expression": "taskPriority == \"high\"" },
                { "id": "pause", "kind": "wait",
                  "wait": { "wait_type": "duration", "amount": 2, "unit": "days" } }
            ],
            "edges": [
                { "source": "start", "target": "task" },
                { "source": "check", "target": "pause", "branch": "true" }
            ]
        }))
        .unwrap();

        assert_eq!(def.version, 1);
        assert_eq!(def.nodes[0].kind, NodeKind::Trigger {
            trigger: TriggerSpec::Event { event: "employee.created".into() },
        });
        assert!(matches!(
            def.nodes[2].kind,
            NodeKind::Condition { ref true_label, .. } if true_label == "Yes"
        ));
        assert_eq!(def.edges[1].branch, Some(Branch::True));
    }

    #[test]
    fn unknown_action_type_is_a_parse_error() {
        let parsed = serde_json::from_value::<NodeDefinition>(json!({
            "id": "x", "kind": "action", "action_type": "print_money"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn month_waits_use_calendar_months() {
        let jan31 = Utc.with_ymd_and_hms(2025, 1, 31, 9, 0, 0).unwrap();
        let wait = WaitSpec::Duration { amount: 1, unit: DurationUnit::Months };
        assert_eq!(
            wait.resolve_at(jan31),
            Some(Utc.with_ymd_and_hms(2025, 2, 28, 9, 0, 0).unwrap())
        );

        let two_days = WaitSpec::Duration { amount: 2, unit: DurationUnit::Days };
        assert_eq!(two_days.resolve_at(jan31), Some(jan31 + chrono::Duration::days(2)));
        assert_eq!(WaitSpec::Approval { approver: None, message: None }.resolve_at(jan31), None);
    }
}
