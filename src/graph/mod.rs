//! Workflow graph model: definitions, per-run records, graph queries, and
//! structural validation.

pub mod execution;
pub mod schema;
pub mod traversal;
pub mod validator;

pub use execution::{ExecutionStatus, StepExecution, WorkflowExecution};
pub use schema::{
    CompareOp, ConditionExpr, EdgeCondition, NodeKind, TriggerKind, Workflow, WorkflowEdge,
    WorkflowNode, WorkflowStatus, WorkflowTrigger, TRIGGER_SOURCE,
};
pub use validator::validate_workflow;
