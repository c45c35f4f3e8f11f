//! Recovery policies for failed executions.
//!
//! The engine never picks a strategy on its own: it surfaces the terminal
//! error and leaves strategy selection to per-workflow policy or an
//! operator. Each strategy rewrites the failed execution record and tells
//! the caller where dispatch may continue.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};
use crate::graph::execution::{ExecutionStatus, WorkflowExecution};
use crate::graph::schema::Workflow;

/// Composable recovery policy applied to a failed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Leave the failed step in place and continue with the node's
    /// successors.
    Skip,
    /// Substitute a fallback output for the failed step, publish it, and
    /// continue with the node's successors.
    Fallback { value: Map<String, Value> },
    /// Roll the step list back to the last completed occurrence of the
    /// checkpoint node and retry from that node.
    Rollback { checkpoint: String },
    /// Park the execution in `Waiting` for an operator; notification is
    /// delivered out of band by the surrounding system.
    Escalate,
}

/// Where dispatch may continue after a strategy was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Dispatch the plain successors of the named node.
    ContinueAfter(String),
    /// Re-dispatch the named node itself.
    RetryFrom(String),
    /// Execution stays parked; nothing to dispatch.
    Parked,
}

impl RecoveryStrategy {
    /// Rewrite a failed execution record according to this strategy.
    ///
    /// Fails when the execution is not in `Failed` state or when the
    /// record carries no failed step to recover from.
    pub fn apply(
        &self,
        workflow: &Workflow,
        execution: &mut WorkflowExecution,
    ) -> EngineResult<RecoveryAction> {
        if execution.status != ExecutionStatus::Failed {
            return Err(EngineError::validation(format!(
                "recovery requires a failed execution, found {:?}",
                execution.status
            )));
        }
        let failed_node = execution
            .steps
            .iter()
            .rev()
            .find(|s| s.status == ExecutionStatus::Failed)
            .map(|s| s.node_id.clone())
            .ok_or_else(|| EngineError::validation("execution has no failed step"))?;

        match self {
            RecoveryStrategy::Skip => {
                execution.status = ExecutionStatus::Running;
                execution.error = None;
                execution.finished_at = None;
                Ok(RecoveryAction::ContinueAfter(failed_node))
            }
            RecoveryStrategy::Fallback { value } => {
                let outputs = workflow
                    .node(&failed_node)
                    .map(|n| n.outputs.clone())
                    .unwrap_or_default();
                if let Some(step) = execution
                    .steps
                    .iter_mut()
                    .rev()
                    .find(|s| s.node_id == failed_node && s.status == ExecutionStatus::Failed)
                {
                    step.status = ExecutionStatus::Completed;
                    step.output = Value::Object(value.clone());
                }
                for name in outputs {
                    if let Some(v) = value.get(&name) {
                        execution.context.insert(name, v.clone());
                    }
                }
                execution.status = ExecutionStatus::Running;
                execution.error = None;
                execution.finished_at = None;
                Ok(RecoveryAction::ContinueAfter(failed_node))
            }
            RecoveryStrategy::Rollback { checkpoint } => {
                let anchor = execution
                    .steps
                    .iter()
                    .rposition(|s| {
                        s.node_id == *checkpoint && s.status == ExecutionStatus::Completed
                    })
                    .ok_or_else(|| {
                        EngineError::validation(format!(
                            "no completed checkpoint step for node {}",
                            checkpoint
                        ))
                    })?;
                execution.steps.truncate(anchor);
                execution.status = ExecutionStatus::Running;
                execution.error = None;
                execution.finished_at = None;
                Ok(RecoveryAction::RetryFrom(checkpoint.clone()))
            }
            RecoveryStrategy::Escalate => {
                tracing::warn!(
                    execution_id = %execution.id,
                    node_id = %failed_node,
                    "execution escalated to operator"
                );
                execution.status = ExecutionStatus::Waiting;
                execution.finished_at = None;
                Ok(RecoveryAction::Parked)
            }
        }
    }
}
