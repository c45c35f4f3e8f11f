use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Synthetic edge source denoting the implicit trigger anchor.
pub const TRIGGER_SOURCE: &str = "trigger";

// ================================
// Nodes
// ================================

/// One step in a workflow graph. The kind tag determines execution
/// semantics; `config` is free-form and may contain `{{...}}` templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Output variable names this node may publish into the run context.
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Kind-specific node payload, decoded once at workflow-load time so the
/// engine dispatches on a closed set of variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Invokes an externally registered action handler by name.
    Action { action: String },
    /// Routes into `true_branch` or `false_branch`; a missing condition
    /// behaves as always-true.
    Condition {
        #[serde(default)]
        condition: Option<ConditionExpr>,
        #[serde(default)]
        true_branch: Vec<String>,
        #[serde(default)]
        false_branch: Vec<String>,
    },
    /// Executes `body` once per element of the resolved `collection`.
    Loop {
        collection: String,
        #[serde(default = "default_item_variable")]
        item_variable: String,
        #[serde(default)]
        body: Vec<String>,
    },
    /// Independent branches run concurrently on snapshot-isolated contexts.
    Parallel { branches: Vec<Vec<String>> },
    /// Sleeps a fixed duration, or until an absolute resolved time.
    Delay {
        #[serde(default)]
        duration_ms: Option<u64>,
        #[serde(default)]
        until: Option<String>,
    },
    /// Terminal no-op.
    End,
}

fn default_item_variable() -> String {
    "item".to_string()
}

impl NodeKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Action { .. } => "action",
            NodeKind::Condition { .. } => "condition",
            NodeKind::Loop { .. } => "loop",
            NodeKind::Parallel { .. } => "parallel",
            NodeKind::Delay { .. } => "delay",
            NodeKind::End => "end",
        }
    }
}

// ================================
// Edges
// ================================

/// Branch tag disambiguating edges that leave a condition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    True,
    False,
}

/// Directed connection `source -> target`. Source `"trigger"` denotes the
/// implicit trigger anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<EdgeCondition>,
}

impl WorkflowEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        WorkflowEdge {
            source: source.into(),
            target: target.into(),
            label: None,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: EdgeCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

// ================================
// Conditions
// ================================

/// Comparison operator table for simple conditions. Unknown strings
/// deserialize into `Unknown` and always evaluate false, so a bad
/// operator mis-routes one branch instead of rejecting the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    In,
    NotIn,
    Matches,
    Unknown,
}

impl CompareOp {
    pub fn from_name(name: &str) -> Self {
        match name {
            "equals" => CompareOp::Equals,
            "not_equals" => CompareOp::NotEquals,
            "greater_than" => CompareOp::GreaterThan,
            "less_than" => CompareOp::LessThan,
            "greater_or_equal" => CompareOp::GreaterOrEqual,
            "less_or_equal" => CompareOp::LessOrEqual,
            "contains" => CompareOp::Contains,
            "not_contains" => CompareOp::NotContains,
            "starts_with" => CompareOp::StartsWith,
            "ends_with" => CompareOp::EndsWith,
            "is_empty" => CompareOp::IsEmpty,
            "is_not_empty" => CompareOp::IsNotEmpty,
            "in" => CompareOp::In,
            "not_in" => CompareOp::NotIn,
            "matches" => CompareOp::Matches,
            _ => CompareOp::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CompareOp::Equals => "equals",
            CompareOp::NotEquals => "not_equals",
            CompareOp::GreaterThan => "greater_than",
            CompareOp::LessThan => "less_than",
            CompareOp::GreaterOrEqual => "greater_or_equal",
            CompareOp::LessOrEqual => "less_or_equal",
            CompareOp::Contains => "contains",
            CompareOp::NotContains => "not_contains",
            CompareOp::StartsWith => "starts_with",
            CompareOp::EndsWith => "ends_with",
            CompareOp::IsEmpty => "is_empty",
            CompareOp::IsNotEmpty => "is_not_empty",
            CompareOp::In => "in",
            CompareOp::NotIn => "not_in",
            CompareOp::Matches => "matches",
            CompareOp::Unknown => "unknown",
        }
    }
}

impl Serialize for CompareOp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CompareOp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(CompareOp::from_name(&name))
    }
}

/// Boolean condition tree evaluated against the run context. `field` and
/// `value` of a simple condition may themselves be templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionExpr {
    Simple {
        field: String,
        operator: CompareOp,
        #[serde(default)]
        value: Value,
    },
    And { conditions: Vec<ConditionExpr> },
    Or { conditions: Vec<ConditionExpr> },
    Not { condition: Box<ConditionExpr> },
}

// ================================
// Triggers
// ================================

/// Trigger source discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    Event { event: String },
    Schedule {
        #[serde(default)]
        cron: Option<String>,
        #[serde(default)]
        interval_secs: Option<u64>,
    },
    Manual,
    Webhook { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTrigger {
    #[serde(flatten)]
    pub kind: TriggerKind,
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl WorkflowTrigger {
    pub fn manual() -> Self {
        WorkflowTrigger {
            kind: TriggerKind::Manual,
            config: Map::new(),
        }
    }

    pub fn event(event: impl Into<String>) -> Self {
        WorkflowTrigger {
            kind: TriggerKind::Event { event: event.into() },
            config: Map::new(),
        }
    }
}

// ================================
// Workflow aggregate
// ================================

/// Lifecycle status: `Draft -> Active <-> Paused -> Archived`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

/// Aggregate root for a workflow definition. Mutated by the authoring
/// surface; the engine only writes run counters and the last-run timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: WorkflowStatus,
    pub version: u64,
    pub trigger: WorkflowTrigger,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    /// Workflow-scoped variable defaults merged into each run context.
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, trigger: WorkflowTrigger) -> Self {
        let now = Utc::now();
        Workflow {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.into(),
            name: name.into(),
            description: String::new(),
            status: WorkflowStatus::Draft,
            version: 1,
            trigger,
            nodes: Vec::new(),
            edges: Vec::new(),
            variables: Map::new(),
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Bump the version and updated timestamp after an authoring mutation.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    pub fn activate(&mut self) -> EngineResult<()> {
        match self.status {
            WorkflowStatus::Draft | WorkflowStatus::Paused => {
                self.status = WorkflowStatus::Active;
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(EngineError::validation(format!(
                "cannot activate workflow in status {:?}",
                other
            ))),
        }
    }

    pub fn pause(&mut self) -> EngineResult<()> {
        match self.status {
            WorkflowStatus::Active => {
                self.status = WorkflowStatus::Paused;
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(EngineError::validation(format!(
                "cannot pause workflow in status {:?}",
                other
            ))),
        }
    }

    pub fn archive(&mut self) -> EngineResult<()> {
        match self.status {
            WorkflowStatus::Active | WorkflowStatus::Paused => {
                self.status = WorkflowStatus::Archived;
                self.updated_at = Utc::now();
                Ok(())
            }
            other => Err(EngineError::validation(format!(
                "cannot archive workflow in status {:?}",
                other
            ))),
        }
    }
}
