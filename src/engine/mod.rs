//! Execution engine: action registry, run context, retry handler,
//! recovery policies, and the graph dispatcher.

pub mod actions;
pub mod context;
#[allow(clippy::module_inception)]
pub mod engine;
pub mod recovery;
pub mod retry;

pub use actions::{ActionHandler, ActionRegistry};
pub use context::ExecutionContext;
pub use engine::{share_workflow, EngineConfig, SharedExecution, SharedWorkflow, WorkflowEngine};
pub use recovery::{RecoveryAction, RecoveryStrategy};
pub use retry::{run_with_retry, BackoffStrategy, RetryOutcome, RetryPolicy};
