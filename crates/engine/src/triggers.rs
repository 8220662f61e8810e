//! Trigger firing.
//!
//! Every firing creates a new, independent execution; nothing is
//! de-duplicated.  Firing only creates the execution: callers hand it to
//! [`WorkflowExecutor::run`] (usually through a worker pool).

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

use db::repository::workflows as wf_repo;
use db::ExecutionRecord;

use crate::dag::ExecutableGraph;
use crate::{EngineError, WorkflowExecutor};

const TRIGGER_KEY: &str = "_trigger";

/// Seed context for a new execution.  An object payload is the context;
/// any other payload is kept under `payload`.  Firing metadata goes under
/// `_trigger`.
///
/// Node outputs are later merged under their node ids, so a payload key
/// equal to a node id (or to `_trigger`) is rejected rather than silently
/// overwritten.
fn seed_context(graph: &ExecutableGraph, payload: Value, trigger: Value) -> Result<Map<String, Value>, EngineError> {
    let mut context = match payload {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => Map::from_iter([("payload".to_owned(), other)]),
    };
    if let Some(key) = context.keys().find(|k| *k == TRIGGER_KEY || graph.node(k).is_some()) {
        return Err(EngineError::ReservedContextKey {
            workflow_id: graph.workflow_id.clone(),
            key: key.clone(),
        });
    }
    context.insert(TRIGGER_KEY.to_owned(), trigger);
    Ok(context)
}

impl WorkflowExecutor {
    /// Fire a manual trigger of the latest version of `workflow_id`.
    ///
    /// `trigger_node_id` picks the trigger when the workflow has several;
    /// without it the first manual trigger is used.
    #[instrument(skip(self, payload))]
    pub async fn fire_manual(
        &self,
        workflow_id: &str,
        trigger_node_id: Option<&str>,
        payload: Value,
    ) -> Result<ExecutionRecord, EngineError> {
        let graph = self.latest_graph(workflow_id).await?;
        let node_id = match trigger_node_id {
            Some(id) => id.to_owned(),
            None => graph
                .manual_trigger()
                .ok_or_else(|| EngineError::NoMatchingTrigger {
                    workflow_id: workflow_id.to_owned(),
                    detail: "no manual trigger".into(),
                })?
                .to_owned(),
        };

        let context = seed_context(
            &graph,
            payload,
            json!({ "type": "manual", "node_id": node_id, "fired_at": Utc::now() }),
        )?;
        self.start(&graph, &node_id, context).await
    }

    /// Fire every event trigger listening for `event`, across the latest
    /// version of every stored workflow.  Returns one execution per
    /// matching trigger node, possibly none.
    #[instrument(skip(self, payload))]
    pub async fn fire_event(&self, event: &str, payload: Value) -> Result<Vec<ExecutionRecord>, EngineError> {
        let mut started = Vec::new();

        for record in wf_repo::list_workflows(self.pool()).await? {
            let graph = match self.graph_from_record(&record) {
                Ok(graph) => graph,
                Err(e) => {
                    warn!(workflow_id = %record.id, error = %e, "skipping unloadable workflow");
                    continue;
                }
            };
            let listeners: Vec<String> = graph.event_triggers(event).map(str::to_owned).collect();
            for node_id in listeners {
                let context = match seed_context(
                    &graph,
                    payload.clone(),
                    json!({ "type": "event", "event": event, "node_id": node_id, "fired_at": Utc::now() }),
                ) {
                    Ok(context) => context,
                    Err(e) => {
                        warn!(workflow_id = %record.id, error = %e, "skipping listener");
                        continue;
                    }
                };
                started.push(self.start(&graph, &node_id, context).await?);
            }
        }

        info!(event, executions = started.len(), "event fired");
        Ok(started)
    }

    /// Fire one schedule trigger for the instant the clock reached.
    pub async fn fire_schedule(
        &self,
        graph: &ExecutableGraph,
        trigger_node_id: &str,
        fired_at: DateTime<Utc>,
    ) -> Result<ExecutionRecord, EngineError> {
        let context = seed_context(
            graph,
            Value::Null,
            json!({ "type": "schedule", "node_id": trigger_node_id, "fired_at": fired_at }),
        )?;
        self.start(graph, trigger_node_id, context).await
    }
}
