//! Structural validation of workflow definitions.
//!
//! Non-throwing: returns a list of human-readable problems for the
//! authoring surface to display before activation. A workflow with a
//! non-empty report must not be executed.

use std::collections::{HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};

use super::schema::{NodeKind, Workflow, TRIGGER_SOURCE};

/// Validate a workflow definition, returning every problem found.
pub fn validate_workflow(workflow: &Workflow) -> Vec<String> {
    let mut errors = Vec::new();

    let mut ids = HashSet::new();
    for node in &workflow.nodes {
        if !ids.insert(node.id.as_str()) {
            errors.push(format!("duplicate node id: {}", node.id));
        }
    }

    for edge in &workflow.edges {
        if edge.source != TRIGGER_SOURCE && !ids.contains(edge.source.as_str()) {
            errors.push(format!("edge source references missing node: {}", edge.source));
        }
        if !ids.contains(edge.target.as_str()) {
            errors.push(format!("edge target references missing node: {}", edge.target));
        }
    }

    if workflow.start_nodes().is_empty() {
        errors.push("no start nodes: no edge leaves the trigger anchor".to_string());
    }

    for node in &workflow.nodes {
        match &node.kind {
            NodeKind::Action { action } => {
                if action.is_empty() {
                    errors.push(format!("action node {} has an empty action name", node.id));
                }
            }
            NodeKind::Condition {
                true_branch,
                false_branch,
                ..
            } => {
                check_refs(&mut errors, &ids, &node.id, "true branch", true_branch);
                check_refs(&mut errors, &ids, &node.id, "false branch", false_branch);
            }
            NodeKind::Loop { body, collection, .. } => {
                check_refs(&mut errors, &ids, &node.id, "loop body", body);
                if collection.is_empty() {
                    errors.push(format!("loop node {} has an empty collection expression", node.id));
                }
            }
            NodeKind::Parallel { branches } => {
                let mut seen = HashSet::new();
                for branch in branches {
                    check_refs(&mut errors, &ids, &node.id, "parallel branch", branch);
                    for member in branch {
                        if !seen.insert(member.as_str()) {
                            errors.push(format!(
                                "parallel node {} lists node {} in more than one branch",
                                node.id, member
                            ));
                        }
                    }
                }
            }
            NodeKind::Delay { duration_ms, until } => {
                if duration_ms.is_none() && until.is_none() {
                    errors.push(format!(
                        "delay node {} needs either duration_ms or until",
                        node.id
                    ));
                }
            }
            NodeKind::End => {}
        }
    }

    if let Some(cycle_node) = find_cycle_member(workflow) {
        errors.push(format!(
            "graph contains a cycle reachable through node {}",
            cycle_node
        ));
    }

    errors
}

fn check_refs(
    errors: &mut Vec<String>,
    ids: &HashSet<&str>,
    node_id: &str,
    what: &str,
    refs: &[String],
) {
    for r in refs {
        if !ids.contains(r.as_str()) {
            errors.push(format!(
                "{} of node {} references missing node: {}",
                what, node_id, r
            ));
        }
    }
}

/// Detect a cycle over the plain-edge graph, returning one member node id.
/// The engine also guards at runtime with a recursion ceiling, but the
/// authoring surface should reject cyclic graphs up front.
fn find_cycle_member(workflow: &Workflow) -> Option<String> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &workflow.nodes {
        index.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for edge in &workflow.edges {
        if let (Some(&s), Some(&t)) = (
            index.get(edge.source.as_str()),
            index.get(edge.target.as_str()),
        ) {
            graph.add_edge(s, t, ());
        }
    }
    match petgraph::algo::toposort(&graph, None) {
        Ok(_) => None,
        Err(cycle) => graph.node_weight(cycle.node_id()).map(|id| id.to_string()),
    }
}
