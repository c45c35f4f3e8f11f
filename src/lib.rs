//! # flowrun — a workflow automation engine
//!
//! `flowrun` stores workflow definitions as directed graphs of typed
//! steps and executes instances of those graphs against runtime data.
//! It is an in-process execution core: persistence, APIs, authentication,
//! trigger delivery, and the catalog of concrete business actions live in
//! the surrounding service and talk to the engine through the contracts
//! in [`engine`].
//!
//! - **Graph model** ([`graph`]): workflows, nodes (`action`, `condition`,
//!   `loop`, `parallel`, `delay`, `end`), edges, triggers, and per-run
//!   execution/step records, plus a non-throwing structural validator.
//! - **Variable resolver** ([`template`]): the `{{...}}` expression
//!   language with dotted paths, indexing, builtins, and pipe transforms.
//! - **Expression evaluator** ([`evaluator`]): boolean condition trees
//!   over the run context; conditions never abort a run.
//! - **Execution engine** ([`engine`]): depth-first dispatch with
//!   concurrent `parallel` branches, cancellation-aware delays,
//!   exponential-backoff retry, and composable recovery policies.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde_json::{Map, Value};
//! use flowrun::{
//!     ActionHandler, EngineResult, ExecutionContext, Workflow, WorkflowEngine,
//!     WorkflowTrigger, share_workflow,
//! };
//!
//! struct SendEmail;
//!
//! #[async_trait]
//! impl ActionHandler for SendEmail {
//!     async fn execute(
//!         &self,
//!         config: &Map<String, Value>,
//!         _context: &ExecutionContext,
//!     ) -> EngineResult<Map<String, Value>> {
//!         println!("sending to {:?}", config.get("to"));
//!         Ok(Map::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = WorkflowEngine::with_defaults();
//!     engine.register_action("send_email", Arc::new(SendEmail));
//!     let workflow = share_workflow(Workflow::new(
//!         "alice",
//!         "welcome",
//!         WorkflowTrigger::manual(),
//!     ));
//!     let execution = engine
//!         .execute(&workflow, Map::new(), Map::new())
//!         .await
//!         .unwrap();
//!     println!("{:?}", execution.status);
//! }
//! ```

pub mod engine;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod template;

pub use engine::{
    share_workflow, ActionHandler, ActionRegistry, BackoffStrategy, EngineConfig,
    ExecutionContext, RecoveryAction, RecoveryStrategy, RetryPolicy, SharedExecution,
    SharedWorkflow, WorkflowEngine,
};
pub use error::{EngineError, EngineResult, ErrorKind};
pub use graph::{
    validate_workflow, CompareOp, ConditionExpr, EdgeCondition, ExecutionStatus, NodeKind,
    StepExecution, TriggerKind, Workflow, WorkflowEdge, WorkflowExecution, WorkflowNode,
    WorkflowStatus, WorkflowTrigger, TRIGGER_SOURCE,
};
pub use template::{extract_variables, VariableResolver};
