//! Graph validation — run this before persisting or executing a workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every edge must reference valid node IDs (both `source` and `target`).
//! 3. There is at least one trigger, and no edge leads into a trigger.
//! 4. A condition has exactly one `true` and one `false` edge and nothing
//!    else; every other node has at most one untagged outgoing edge.
//! 5. Node payloads are well formed: condition expressions parse, action
//!    parameters fit their action type, waits and cron expressions are sane.
//! 6. The directed graph is acyclic (topological sort must succeed).
//! 7. Every node is reachable from some trigger.
//!
//! Returns an [`ExecutableGraph`] on success.

use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;

use serde_json::Value;

use nodes::ActionType;

use crate::condition::ConditionExpr;
use crate::error::GraphValidationError;
use crate::models::{Branch, NodeKind, TriggerSpec, WaitSpec, WorkflowDefinition};

/// What to do when the engine visits a node.
#[derive(Debug, Clone)]
pub enum Step {
    Trigger(TriggerSpec),
    Action { action: ActionType, parameters: Value },
    Condition { expr: ConditionExpr, true_label: String, false_label: String },
    Wait(WaitSpec),
}

/// Where to go after a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Successors {
    /// The run completes after this node.
    End,
    Next(String),
    Branch { on_true: String, on_false: String },
}

impl Successors {
    /// Successor of a non-branching node.
    pub fn single(&self) -> Option<&str> {
        match self {
            Self::Next(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

/// A validated node with its resolved successors.
#[derive(Debug, Clone)]
pub struct ExecutableNode {
    pub id: String,
    pub label: String,
    pub step: Step,
    pub next: Successors,
}

impl ExecutableNode {
    /// Type recorded in the audit log: the action type for actions, the
    /// node kind otherwise.
    pub fn log_type(&self) -> &'static str {
        match &self.step {
            Step::Trigger(_) => "trigger",
            Step::Action { action, .. } => action.as_str(),
            Step::Condition { .. } => "condition",
            Step::Wait(_) => "wait",
        }
    }
}

/// A workflow the engine can run.  Successor lookup is a single map access.
#[derive(Debug, Clone)]
pub struct ExecutableGraph {
    pub workflow_id: String,
    pub version: i64,
    pub name: String,
    nodes: HashMap<String, ExecutableNode>,
    /// Trigger node ids in definition order.
    triggers: Vec<String>,
    /// All node ids in a topological order.
    order: Vec<String>,
}

impl ExecutableGraph {
    pub fn node(&self, id: &str) -> Option<&ExecutableNode> {
        self.nodes.get(id)
    }

    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    pub fn triggers(&self) -> impl Iterator<Item = (&str, &TriggerSpec)> {
        self.triggers.iter().filter_map(|id| match &self.nodes[id].step {
            Step::Trigger(spec) => Some((id.as_str(), spec)),
            _ => None,
        })
    }

    /// First manual trigger, used when a manual firing names none.
    pub fn manual_trigger(&self) -> Option<&str> {
        self.triggers()
            .find(|(_, spec)| matches!(spec, TriggerSpec::Manual))
            .map(|(id, _)| id)
    }

    /// Triggers listening for the named event.
    pub fn event_triggers<'a>(&'a self, event: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.triggers().filter_map(move |(id, spec)| match spec {
            TriggerSpec::Event { event: name } if name == event => Some(id),
            _ => None,
        })
    }

    /// `(node id, cron expression)` for every schedule trigger.
    pub fn schedule_triggers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.triggers().filter_map(|(id, spec)| match spec {
            TriggerSpec::Schedule { cron } => Some((id, cron.as_str())),
            _ => None,
        })
    }
}

/// Validate a workflow definition and build its executable graph.
///
/// # Errors
/// The first [`GraphValidationError`] found, checking rules in the order
/// listed in the module docs and nodes in definition order.
pub fn validate(workflow: &WorkflowDefinition) -> Result<ExecutableGraph, GraphValidationError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for node in &workflow.nodes {
        if !seen_ids.insert(node.id.as_str()) {
            return Err(GraphValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    let kinds: HashMap<&str, &NodeKind> =
        workflow.nodes.iter().map(|n| (n.id.as_str(), &n.kind)).collect();

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        if !kinds.contains_key(edge.source.as_str()) {
            return Err(GraphValidationError::UnknownNodeReference {
                node_id: edge.source.clone(),
                side: "source",
            });
        }
        if !kinds.contains_key(edge.target.as_str()) {
            return Err(GraphValidationError::UnknownNodeReference {
                node_id: edge.target.clone(),
                side: "target",
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3. Triggers
    // -----------------------------------------------------------------------
    let triggers: Vec<String> = workflow
        .nodes
        .iter()
        .filter(|n| matches!(n.kind, NodeKind::Trigger { .. }))
        .map(|n| n.id.clone())
        .collect();
    if triggers.is_empty() {
        return Err(GraphValidationError::NoTrigger);
    }
    for edge in &workflow.edges {
        if matches!(kinds[edge.target.as_str()], NodeKind::Trigger { .. }) {
            return Err(GraphValidationError::EdgeIntoTrigger {
                source_id: edge.source.clone(),
                trigger_id: edge.target.clone(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // 4 + 5. Successors and node payloads
    // -----------------------------------------------------------------------
    let mut nodes: HashMap<String, ExecutableNode> = HashMap::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        let outgoing: Vec<_> = workflow.edges.iter().filter(|e| e.source == node.id).collect();
        let is_condition = matches!(node.kind, NodeKind::Condition { .. });

        let next = if is_condition {
            let mut on_true = None;
            let mut on_false = None;
            for edge in &outgoing {
                let slot = match edge.branch {
                    Some(Branch::True) => &mut on_true,
                    Some(Branch::False) => &mut on_false,
                    None => {
                        return Err(GraphValidationError::BadBranchTag {
                            source_id: edge.source.clone(),
                            target_id: edge.target.clone(),
                            reason: "edges leaving a condition need a true/false branch",
                        })
                    }
                };
                if slot.replace(edge.target.clone()).is_some() {
                    return Err(GraphValidationError::DuplicateBranch {
                        node_id: node.id.clone(),
                        branch: edge.branch.unwrap_or(Branch::True),
                    });
                }
            }
            match (on_true, on_false) {
                (Some(on_true), Some(on_false)) => Successors::Branch { on_true, on_false },
                (None, _) => {
                    return Err(GraphValidationError::MissingBranch {
                        node_id: node.id.clone(),
                        branch: Branch::True,
                    })
                }
                (_, None) => {
                    return Err(GraphValidationError::MissingBranch {
                        node_id: node.id.clone(),
                        branch: Branch::False,
                    })
                }
            }
        } else {
            if let Some(edge) = outgoing.iter().find(|e| e.branch.is_some()) {
                return Err(GraphValidationError::BadBranchTag {
                    source_id: edge.source.clone(),
                    target_id: edge.target.clone(),
                    reason: "only edges leaving a condition may carry a branch",
                });
            }
            match outgoing.as_slice() {
                [] => Successors::End,
                [only] => Successors::Next(only.target.clone()),
                _ => return Err(GraphValidationError::TooManySuccessors(node.id.clone())),
            }
        };

        let step = build_step(&node.id, &node.kind)?;
        nodes.insert(
            node.id.clone(),
            ExecutableNode { id: node.id.clone(), label: node.label.clone(), step, next },
        );
    }

    // -----------------------------------------------------------------------
    // 6. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut in_degree: HashMap<&str, usize> =
        workflow.nodes.iter().map(|n| (n.id.as_str(), 0)).collect();
    for edge in &workflow.edges {
        *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
    }

    // Seed in definition order so the result is deterministic.
    let mut queue: VecDeque<&str> = workflow
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(workflow.nodes.len());
    while let Some(node_id) = queue.pop_front() {
        order.push(node_id.to_owned());
        for edge in workflow.edges.iter().filter(|e| e.source == node_id) {
            let deg = in_degree.entry(edge.target.as_str()).or_insert(0);
            *deg -= 1;
            if *deg == 0 {
                queue.push_back(edge.target.as_str());
            }
        }
    }

    // If we didn't visit every node the graph contains a cycle.
    if order.len() != workflow.nodes.len() {
        return Err(GraphValidationError::CycleDetected);
    }

    // -----------------------------------------------------------------------
    // 7. Reachability from the triggers
    // -----------------------------------------------------------------------
    let mut reached: HashSet<&str> = HashSet::new();
    let mut frontier: Vec<&str> = triggers.iter().map(String::as_str).collect();
    while let Some(id) = frontier.pop() {
        if !reached.insert(id) {
            continue;
        }
        match &nodes[id].next {
            Successors::End => {}
            Successors::Next(next) => frontier.push(next),
            Successors::Branch { on_true, on_false } => {
                frontier.push(on_true);
                frontier.push(on_false);
            }
        }
    }
    if let Some(orphan) = workflow.nodes.iter().find(|n| !reached.contains(n.id.as_str())) {
        return Err(GraphValidationError::Unreachable(orphan.id.clone()));
    }

    Ok(ExecutableGraph {
        workflow_id: workflow.id.clone(),
        version: workflow.version,
        name: workflow.name.clone(),
        nodes,
        triggers,
        order,
    })
}

fn build_step(node_id: &str, kind: &NodeKind) -> Result<Step, GraphValidationError> {
    match kind {
        NodeKind::Trigger { trigger } => {
            match trigger {
                TriggerSpec::Schedule { cron } => {
                    cron::Schedule::from_str(cron).map_err(|e| GraphValidationError::InvalidTrigger {
                        node_id: node_id.to_owned(),
                        message: format!("bad cron expression '{cron}': {e}"),
                    })?;
                }
                TriggerSpec::Event { event } if event.trim().is_empty() => {
                    return Err(GraphValidationError::InvalidTrigger {
                        node_id: node_id.to_owned(),
                        message: "event name is empty".into(),
                    });
                }
                _ => {}
            }
            Ok(Step::Trigger(trigger.clone()))
        }
        NodeKind::Action { action_type, parameters } => {
            nodes::validate_parameters(*action_type, parameters).map_err(|e| {
                GraphValidationError::InvalidParameters {
                    node_id: node_id.to_owned(),
                    message: e.to_string(),
                }
            })?;
            Ok(Step::Action { action: *action_type, parameters: parameters.clone() })
        }
        NodeKind::Condition { expression, true_label, false_label } => {
            let expr = expression.parse::<ConditionExpr>().map_err(|message| {
                GraphValidationError::InvalidCondition { node_id: node_id.to_owned(), message }
            })?;
            Ok(Step::Condition {
                expr,
                true_label: true_label.clone(),
                false_label: false_label.clone(),
            })
        }
        NodeKind::Wait { wait } => {
            if let WaitSpec::Duration { amount: 0, .. } = wait {
                return Err(GraphValidationError::InvalidWait {
                    node_id: node_id.to_owned(),
                    message: "duration must be positive".into(),
                });
            }
            Ok(Step::Wait(wait.clone()))
        }
    }
}
