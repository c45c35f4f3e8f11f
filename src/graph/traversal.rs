//! Graph queries over a workflow definition. Edge-list order is
//! significant: it determines sibling dispatch order.

use super::schema::{NodeKind, Workflow, WorkflowNode, TRIGGER_SOURCE};

impl Workflow {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Targets of edges leaving the implicit trigger anchor, in edge-list
    /// order.
    pub fn start_nodes(&self) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == TRIGGER_SOURCE)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// Plain graph successors of a node, in edge-list order.
    ///
    /// For condition nodes, branch-tagged edges are excluded: the branch
    /// lists fully own downstream flow for that node.
    pub fn successors(&self, node_id: &str) -> Vec<&str> {
        let is_condition = self
            .node(node_id)
            .map(|n| matches!(n.kind, NodeKind::Condition { .. }))
            .unwrap_or(false);
        self.edges
            .iter()
            .filter(|e| e.source == node_id)
            .filter(|e| !(is_condition && e.condition.is_some()))
            .map(|e| e.target.as_str())
            .collect()
    }
}
