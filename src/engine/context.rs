use serde_json::{json, Map, Value};

use crate::graph::schema::Workflow;
use crate::template::VariableResolver;

/// Mutable variable namespace for one execution.
///
/// Owned exclusively by the execution's dispatch tree; parallel branches
/// receive forked snapshots and are merged back after the join, so no
/// locking is needed inside a run.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the initial context for a run:
    /// `{workflow: {...}, trigger: payload, input: payload}` plus
    /// workflow-scoped variable defaults (which never shadow an existing
    /// key).
    pub fn seed(
        workflow: &Workflow,
        input_data: &Map<String, Value>,
        trigger_data: &Map<String, Value>,
    ) -> Self {
        let mut values = Map::new();
        values.insert(
            "workflow".to_string(),
            json!({
                "id": workflow.id,
                "name": workflow.name,
                "version": workflow.version,
                "owner": workflow.owner,
            }),
        );
        values.insert("trigger".to_string(), Value::Object(trigger_data.clone()));
        values.insert("input".to_string(), Value::Object(input_data.clone()));
        for (key, value) in &workflow.variables {
            values.entry(key.clone()).or_insert_with(|| value.clone());
        }
        ExecutionContext { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }

    pub fn from_values(values: Map<String, Value>) -> Self {
        ExecutionContext { values }
    }

    /// Snapshot copy handed to a parallel branch at fork time.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Merge a joined branch context back, last writer wins. Callers merge
    /// branches in declaration order.
    pub fn merge(&mut self, branch: ExecutionContext) {
        for (key, value) in branch.values {
            self.values.insert(key, value);
        }
    }

    /// The whole context as a JSON object, for step input snapshots.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.clone())
    }

    pub fn resolver(&self) -> VariableResolver<'_> {
        VariableResolver::new(&self.values)
    }
}
