//! The execution engine: walks a workflow graph depth-first, dispatching
//! each node by kind, recording step history, and driving retry and
//! cancellation.
//!
//! One engine instance per process; it owns the action registry, the
//! live-run registry, and per-workflow execution history. Within one
//! execution dispatch is sequential except inside a `parallel` node, where
//! each branch runs as its own task on a snapshot-isolated context.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, EngineResult};
use crate::evaluator;
use crate::graph::execution::{ExecutionStatus, StepExecution, WorkflowExecution};
use crate::graph::schema::{NodeKind, Workflow, WorkflowNode};

use super::actions::{ActionHandler, ActionRegistry};
use super::context::ExecutionContext;
use super::recovery::{RecoveryAction, RecoveryStrategy};
use super::retry::{run_with_retry, RetryPolicy};

/// Workflow definition handle shared between the authoring surface and the
/// engine. The engine clones the graph at run start and only writes back
/// run counters and the last-run timestamp.
pub type SharedWorkflow = Arc<RwLock<Workflow>>;

/// Execution record shared between the dispatch tree and the management
/// surface.
pub type SharedExecution = Arc<RwLock<WorkflowExecution>>;

pub fn share_workflow(workflow: Workflow) -> SharedWorkflow {
    Arc::new(RwLock::new(workflow))
}

/// Engine-wide limits and defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Recursion ceiling per execution; dispatch fails fast past this
    /// depth instead of recursing through a cyclic graph.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// Total step budget per execution.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Finished executions retained per workflow.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Default retry policy for action nodes; a node may override it via
    /// the `retry` key of its config.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_max_depth() -> u32 {
    128
}
fn default_max_steps() -> usize {
    500
}
fn default_history_limit() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_depth: default_max_depth(),
            max_steps: default_max_steps(),
            history_limit: default_history_limit(),
            retry: RetryPolicy::default(),
        }
    }
}

struct LiveRun {
    execution: SharedExecution,
    cancel: CancellationToken,
}

/// The workflow execution engine. Construct once per process and hand
/// callers a reference (or wrap it in an `Arc`); there is no global
/// singleton.
pub struct WorkflowEngine {
    config: EngineConfig,
    actions: Arc<ActionRegistry>,
    running: RwLock<HashMap<String, LiveRun>>,
    history: RwLock<HashMap<String, Vec<SharedExecution>>>,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig) -> Self {
        WorkflowEngine {
            config,
            actions: Arc::new(ActionRegistry::new()),
            running: RwLock::new(HashMap::new()),
            history: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn register_action(&self, name: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.actions.register(name, handler);
    }

    // ================================
    // Run entry points
    // ================================

    /// Run one execution of the workflow against the two payload maps.
    ///
    /// The graph is pinned at start: edits to the workflow during the run
    /// are not observed. Returns the terminal execution record; a failed
    /// run is an `Ok` return carrying a `Failed` record, while `Err` is
    /// reserved for calls that never produced an execution.
    pub async fn execute(
        &self,
        workflow: &SharedWorkflow,
        input_data: Map<String, Value>,
        trigger_data: Map<String, Value>,
    ) -> EngineResult<WorkflowExecution> {
        let snapshot = Arc::new(workflow.read().clone());

        let mut execution =
            WorkflowExecution::new(&snapshot, input_data.clone(), trigger_data.clone());
        let context = ExecutionContext::seed(&snapshot, &input_data, &trigger_data);
        execution.context = context.values().clone();
        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        let execution_id = execution.id.clone();

        let shared: SharedExecution = Arc::new(RwLock::new(execution));
        let cancel = CancellationToken::new();
        self.running.write().insert(
            execution_id.clone(),
            LiveRun {
                execution: shared.clone(),
                cancel: cancel.clone(),
            },
        );

        tracing::debug!(execution_id = %execution_id, workflow_id = %snapshot.id, "execution started");

        let start_nodes: Vec<String> = snapshot
            .start_nodes()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let run = RunCtx {
            config: self.config.clone(),
            actions: self.actions.clone(),
            workflow: snapshot,
            execution: shared.clone(),
            cancel,
            steps_dispatched: Arc::new(AtomicUsize::new(0)),
        };

        let mut ctx = context;
        let result = if start_nodes.is_empty() {
            Err(EngineError::validation(
                "workflow has no start nodes connected to the trigger",
            ))
        } else {
            let mut outcome = Ok(());
            for node_id in &start_nodes {
                if let Err(e) = run.dispatch(&mut ctx, node_id, 0).await {
                    outcome = Err(e);
                    break;
                }
            }
            outcome
        };

        self.finalize(workflow, &shared, ctx, result, true)
    }

    /// Apply a recovery strategy to a failed execution and, where the
    /// strategy allows, resume dispatch against the current workflow
    /// graph. Recovered runs are not re-counted in the workflow counters.
    pub async fn recover_execution(
        &self,
        workflow: &SharedWorkflow,
        execution_id: &str,
        strategy: &RecoveryStrategy,
    ) -> EngineResult<WorkflowExecution> {
        let shared = self.find_execution(execution_id).ok_or_else(|| {
            EngineError::validation(format!("unknown execution: {}", execution_id))
        })?;
        let snapshot = Arc::new(workflow.read().clone());

        let action = {
            let mut exec = shared.write();
            strategy.apply(&snapshot, &mut exec)?
        };

        let next_nodes: Vec<String> = match &action {
            RecoveryAction::Parked => return Ok(shared.read().clone()),
            RecoveryAction::ContinueAfter(node) => snapshot
                .successors(node)
                .iter()
                .map(|s| s.to_string())
                .collect(),
            RecoveryAction::RetryFrom(node) => vec![node.clone()],
        };

        let cancel = CancellationToken::new();
        self.running.write().insert(
            execution_id.to_string(),
            LiveRun {
                execution: shared.clone(),
                cancel: cancel.clone(),
            },
        );

        let run = RunCtx {
            config: self.config.clone(),
            actions: self.actions.clone(),
            workflow: snapshot,
            execution: shared.clone(),
            cancel,
            steps_dispatched: Arc::new(AtomicUsize::new(0)),
        };

        let mut ctx = ExecutionContext::from_values(shared.read().context.clone());
        let mut result = Ok(());
        for node_id in &next_nodes {
            if let Err(e) = run.dispatch(&mut ctx, node_id, 0).await {
                result = Err(e);
                break;
            }
        }
        self.finalize(workflow, &shared, ctx, result, false)
    }

    fn finalize(
        &self,
        workflow: &SharedWorkflow,
        shared: &SharedExecution,
        ctx: ExecutionContext,
        result: EngineResult<()>,
        count_run: bool,
    ) -> EngineResult<WorkflowExecution> {
        let final_record = {
            let mut exec = shared.write();
            exec.context = ctx.into_values();
            if exec.status != ExecutionStatus::Cancelled {
                match &result {
                    Ok(()) => exec.status = ExecutionStatus::Completed,
                    Err(e) if e.is_cancelled() => exec.status = ExecutionStatus::Cancelled,
                    Err(e) => {
                        exec.status = ExecutionStatus::Failed;
                        exec.error = Some(e.clone());
                    }
                }
            }
            if exec.finished_at.is_none() {
                exec.finished_at = Some(Utc::now());
            }
            exec.clone()
        };

        if count_run {
            let mut wf = workflow.write();
            wf.run_count += 1;
            match final_record.status {
                ExecutionStatus::Completed => wf.success_count += 1,
                ExecutionStatus::Failed => wf.failure_count += 1,
                _ => {}
            }
            wf.last_run_at = final_record.started_at;
        }

        self.running.write().remove(&final_record.id);
        {
            let mut history = self.history.write();
            let entries = history.entry(final_record.workflow_id.clone()).or_default();
            entries.retain(|e| e.read().id != final_record.id);
            entries.insert(0, shared.clone());
            entries.truncate(self.config.history_limit);
        }

        tracing::debug!(
            execution_id = %final_record.id,
            status = ?final_record.status,
            steps = final_record.steps.len(),
            "execution finished"
        );
        Ok(final_record)
    }

    // ================================
    // Management surface
    // ================================

    fn find_execution(&self, execution_id: &str) -> Option<SharedExecution> {
        if let Some(run) = self.running.read().get(execution_id) {
            return Some(run.execution.clone());
        }
        let history = self.history.read();
        for entries in history.values() {
            for entry in entries {
                if entry.read().id == execution_id {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    pub fn get_execution(&self, execution_id: &str) -> Option<WorkflowExecution> {
        self.find_execution(execution_id).map(|e| e.read().clone())
    }

    /// Finished and in-flight executions of one workflow, newest first.
    pub fn get_workflow_executions(&self, workflow_id: &str, limit: usize) -> Vec<WorkflowExecution> {
        let mut out: Vec<WorkflowExecution> = self
            .running
            .read()
            .values()
            .map(|r| r.execution.read().clone())
            .filter(|e| e.workflow_id == workflow_id)
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(entries) = self.history.read().get(workflow_id) {
            out.extend(entries.iter().map(|e| e.read().clone()));
        }
        out.truncate(limit);
        out
    }

    pub fn get_running_executions(&self) -> Vec<WorkflowExecution> {
        self.running
            .read()
            .values()
            .map(|r| r.execution.read().clone())
            .filter(|e| !e.status.is_terminal())
            .collect()
    }

    /// Cancel a live execution. Stamps the terminal state immediately and
    /// wakes any in-flight delay or retry sleep; dispatch stops at the
    /// next node boundary. Returns false for unknown or already-terminal
    /// executions.
    pub fn cancel_execution(&self, execution_id: &str) -> bool {
        let entry = {
            let running = self.running.read();
            running
                .get(execution_id)
                .map(|r| (r.execution.clone(), r.cancel.clone()))
        };
        let Some((execution, cancel)) = entry else {
            return false;
        };
        {
            let mut exec = execution.write();
            if exec.status.is_terminal() {
                return false;
            }
            exec.status = ExecutionStatus::Cancelled;
            exec.finished_at = Some(Utc::now());
        }
        cancel.cancel();
        tracing::debug!(execution_id, "execution cancelled");
        true
    }
}

// ================================
// Dispatch
// ================================

/// Per-run dispatch state. Cloned into parallel branch tasks; everything
/// inside is shared except the context, which branches fork.
#[derive(Clone)]
struct RunCtx {
    config: EngineConfig,
    actions: Arc<ActionRegistry>,
    workflow: Arc<Workflow>,
    execution: SharedExecution,
    cancel: CancellationToken,
    steps_dispatched: Arc<AtomicUsize>,
}

/// How control continues after a node's own work finished.
enum Continuation {
    /// Complete the step with this output, publish, then follow the plain
    /// successor edges.
    Plain(Value),
    /// The node already routed downstream flow (condition branches).
    Routed,
}

impl RunCtx {
    fn dispatch<'a>(
        &'a self,
        ctx: &'a mut ExecutionContext,
        node_id: &'a str,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = EngineResult<()>> + Send + 'a>> {
        Box::pin(self.dispatch_inner(ctx, node_id, depth))
    }

    async fn dispatch_inner(
        &self,
        ctx: &mut ExecutionContext,
        node_id: &str,
        depth: u32,
    ) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::cancelled());
        }
        if depth > self.config.max_depth {
            return Err(EngineError::execution_fatal(format!(
                "dispatch depth exceeded {}; the graph is likely cyclic",
                self.config.max_depth
            ))
            .at_node(node_id));
        }
        let dispatched = self.steps_dispatched.fetch_add(1, Ordering::SeqCst);
        if dispatched >= self.config.max_steps {
            return Err(EngineError::execution_fatal(format!(
                "step budget of {} exceeded",
                self.config.max_steps
            ))
            .at_node(node_id));
        }

        let node = self
            .workflow
            .node(node_id)
            .ok_or_else(|| EngineError::validation(format!("node not found: {}", node_id)))?;

        let resolved_config = ctx.resolver().resolve_map(&node.config);
        let step_input = json!({
            "config": Value::Object(resolved_config.clone()),
            "context": ctx.snapshot(),
        });
        let step_id = {
            let mut exec = self.execution.write();
            exec.current_node = Some(node_id.to_string());
            let step = StepExecution::start(node_id, step_input);
            let id = step.id.clone();
            exec.steps.push(step);
            id
        };

        tracing::debug!(node_id, kind = node.kind.kind_name(), depth, "dispatching node");

        match self.run_node(ctx, node, &resolved_config, &step_id, depth).await {
            Ok(Continuation::Routed) => Ok(()),
            Ok(Continuation::Plain(output)) => {
                self.complete_step(&step_id, output.clone());
                publish_outputs(node, &output, ctx);
                for successor in self.workflow.successors(node_id) {
                    self.dispatch(ctx, successor, depth + 1).await?;
                }
                Ok(())
            }
            Err(e) => {
                let e = if e.node_id.is_none() {
                    e.at_node(node_id)
                } else {
                    e
                };
                self.fail_step(&step_id, &e);
                Err(e)
            }
        }
    }

    async fn run_node(
        &self,
        ctx: &mut ExecutionContext,
        node: &WorkflowNode,
        resolved_config: &Map<String, Value>,
        step_id: &str,
        depth: u32,
    ) -> EngineResult<Continuation> {
        match &node.kind {
            NodeKind::Action { action } => {
                let output = self
                    .run_action(node, action, resolved_config, &*ctx, step_id)
                    .await?;
                Ok(Continuation::Plain(Value::Object(output)))
            }

            NodeKind::Condition {
                condition,
                true_branch,
                false_branch,
            } => {
                let verdict = match condition {
                    Some(expr) => evaluator::evaluate(expr, &ctx.resolver()),
                    None => true,
                };
                let branch = if verdict { true_branch } else { false_branch };
                self.complete_step(
                    step_id,
                    json!({
                        "result": verdict,
                        "branch": if verdict { "true" } else { "false" },
                    }),
                );
                for branch_node in branch {
                    self.dispatch(ctx, branch_node, depth + 1).await?;
                }
                Ok(Continuation::Routed)
            }

            NodeKind::Loop {
                collection,
                item_variable,
                body,
            } => {
                let items = ctx.resolver().resolve(collection);
                let Value::Array(items) = items else {
                    tracing::debug!(
                        node_id = %node.id,
                        "loop collection did not resolve to a list; zero iterations"
                    );
                    return Ok(Continuation::Plain(json!({"iterations": 0})));
                };
                let index_key = format!("{}_index", item_variable);
                let total = items.len();
                for (i, item) in items.into_iter().enumerate() {
                    ctx.set(item_variable.clone(), item);
                    ctx.set(index_key.clone(), json!(i));
                    for body_node in body {
                        self.dispatch(ctx, body_node, depth + 1).await?;
                    }
                }
                Ok(Continuation::Plain(json!({"iterations": total})))
            }

            NodeKind::Parallel { branches } => {
                let mut tasks: JoinSet<(usize, ExecutionContext, Option<EngineError>)> =
                    JoinSet::new();
                for (index, branch) in branches.iter().enumerate() {
                    let run = self.clone();
                    let branch = branch.clone();
                    let mut branch_ctx = ctx.fork();
                    tasks.spawn(async move {
                        let mut error = None;
                        for branch_node in &branch {
                            if let Err(e) =
                                run.dispatch(&mut branch_ctx, branch_node, depth + 1).await
                            {
                                error = Some(e);
                                break;
                            }
                        }
                        (index, branch_ctx, error)
                    });
                }

                let mut joined = Vec::with_capacity(branches.len());
                while let Some(task) = tasks.join_next().await {
                    match task {
                        Ok(entry) => joined.push(entry),
                        Err(e) => {
                            return Err(EngineError::execution_fatal(format!(
                                "parallel branch task failed: {}",
                                e
                            )))
                        }
                    }
                }
                joined.sort_by_key(|(index, _, _)| *index);

                for (_, _, error) in &joined {
                    if let Some(e) = error {
                        return Err(e.clone());
                    }
                }
                // Merge branch writes back in declaration order, last
                // writer wins.
                let total = joined.len();
                for (_, branch_ctx, _) in joined {
                    ctx.merge(branch_ctx);
                }
                Ok(Continuation::Plain(json!({"branches": total})))
            }

            NodeKind::Delay { duration_ms, until } => {
                let sleep_ms = delay_ms(ctx, duration_ms, until)?;
                if sleep_ms > 0 {
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(EngineError::cancelled()),
                        _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                    }
                }
                Ok(Continuation::Plain(json!({"slept_ms": sleep_ms})))
            }

            NodeKind::End => Ok(Continuation::Plain(Value::Null)),
        }
    }

    async fn run_action(
        &self,
        node: &WorkflowNode,
        action: &str,
        config: &Map<String, Value>,
        ctx: &ExecutionContext,
        step_id: &str,
    ) -> EngineResult<Map<String, Value>> {
        let handler = self.actions.get(action).ok_or_else(|| {
            EngineError::validation(format!("no action handler registered for '{}'", action))
        })?;

        let policy = node
            .config
            .get("retry")
            .and_then(|v| serde_json::from_value::<RetryPolicy>(v.clone()).ok())
            .unwrap_or_else(|| self.config.retry.clone());
        let timeout_ms = node.config.get("timeout_ms").and_then(Value::as_u64);

        let outcome = run_with_retry(
            &policy,
            &self.cancel,
            |_retry| self.set_execution_status(ExecutionStatus::Retrying),
            |_attempt| {
                let handler = handler.clone();
                async move {
                    let invocation = handler.execute(config, ctx);
                    match timeout_ms {
                        Some(ms) => {
                            match tokio::time::timeout(Duration::from_millis(ms), invocation).await
                            {
                                Ok(result) => result,
                                Err(_) => Err(EngineError::timeout(format!(
                                    "action '{}' timed out after {}ms",
                                    action, ms
                                ))),
                            }
                        }
                        None => invocation.await,
                    }
                }
            },
        )
        .await;

        self.set_execution_status(ExecutionStatus::Running);
        self.set_step_retries(step_id, outcome.retries);
        outcome.result
    }

    // ================================
    // Step record helpers
    // ================================

    fn complete_step(&self, step_id: &str, output: Value) {
        let mut exec = self.execution.write();
        if let Some(step) = exec.steps.iter_mut().find(|s| s.id == step_id) {
            if step.status == ExecutionStatus::Running {
                step.complete(output);
            }
        }
    }

    fn fail_step(&self, step_id: &str, error: &EngineError) {
        let mut exec = self.execution.write();
        if let Some(step) = exec.steps.iter_mut().find(|s| s.id == step_id) {
            if step.status == ExecutionStatus::Running {
                step.fail(error);
            }
        }
    }

    fn set_step_retries(&self, step_id: &str, retries: u32) {
        let mut exec = self.execution.write();
        if let Some(step) = exec.steps.iter_mut().find(|s| s.id == step_id) {
            step.retry_count = retries;
        }
    }

    fn set_execution_status(&self, status: ExecutionStatus) {
        let mut exec = self.execution.write();
        if !exec.status.is_terminal() {
            exec.status = status;
        }
    }
}

fn publish_outputs(node: &WorkflowNode, output: &Value, ctx: &mut ExecutionContext) {
    if node.outputs.is_empty() {
        return;
    }
    let Value::Object(map) = output else {
        return;
    };
    for name in &node.outputs {
        if let Some(value) = map.get(name) {
            ctx.set(name.clone(), value.clone());
        }
    }
}

fn delay_ms(
    ctx: &ExecutionContext,
    duration_ms: &Option<u64>,
    until: &Option<String>,
) -> EngineResult<u64> {
    if let Some(ms) = duration_ms {
        return Ok(*ms);
    }
    let Some(until) = until else {
        return Ok(0);
    };
    let resolved = ctx.resolver().resolve(until);
    let Some(text) = resolved.as_str() else {
        return Err(EngineError::validation(format!(
            "delay until did not resolve to a timestamp: {}",
            resolved
        )));
    };
    let at = chrono::DateTime::parse_from_rfc3339(text)
        .map_err(|e| EngineError::validation(format!("invalid delay timestamp '{}': {}", text, e)))?
        .with_timezone(&Utc);
    let now = Utc::now();
    if at <= now {
        // Already past: no-op.
        return Ok(0);
    }
    Ok((at - now).num_milliseconds().max(0) as u64)
}
