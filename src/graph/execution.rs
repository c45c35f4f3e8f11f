use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EngineError;

use super::schema::Workflow;

/// Status shared by executions and their steps.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`, with `Waiting`
/// and `Retrying` as transient sub-states of `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Waiting,
    Retrying,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

// ================================
// Step records
// ================================

/// Execution record of a single node within one run. Steps are keyed by
/// step id, not node id: the same node may legitimately appear more than
/// once (loop bodies, multiple incoming paths).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: String,
    pub node_id: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn start(node_id: impl Into<String>, input: Value) -> Self {
        StepExecution {
            id: uuid::Uuid::new_v4().to_string(),
            node_id: node_id.into(),
            status: ExecutionStatus::Running,
            input,
            output: Value::Null,
            error: None,
            retry_count: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn complete(&mut self, output: Value) {
        self.status = ExecutionStatus::Completed;
        self.output = output;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &EngineError) {
        self.status = if error.is_cancelled() {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration in milliseconds, if the step has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

// ================================
// Execution records
// ================================

/// One run instance of a workflow. The graph is pinned at start: edits to
/// the workflow never affect an in-flight execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub workflow_version: u64,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub trigger_data: Map<String, Value>,
    #[serde(default)]
    pub input_data: Map<String, Value>,
    /// Mutable variable namespace visible to templates and conditions.
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub steps: Vec<StepExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
}

impl WorkflowExecution {
    pub fn new(
        workflow: &Workflow,
        input_data: Map<String, Value>,
        trigger_data: Map<String, Value>,
    ) -> Self {
        WorkflowExecution {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow.id.clone(),
            workflow_version: workflow.version,
            status: ExecutionStatus::Pending,
            trigger_data,
            input_data,
            context: Map::new(),
            steps: Vec::new(),
            current_node: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Steps recorded for a given node id, in dispatch order.
    pub fn steps_for_node(&self, node_id: &str) -> Vec<&StepExecution> {
        self.steps.iter().filter(|s| s.node_id == node_id).collect()
    }
}
