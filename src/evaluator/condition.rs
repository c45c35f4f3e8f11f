//! Condition-tree evaluation.
//!
//! Conditions never abort a run: an unknown operator or a runtime shape
//! error evaluates to `false`, at worst mis-routing one branch.

use crate::graph::schema::{CompareOp, ConditionExpr};
use crate::template::VariableResolver;

use super::operators;

/// Evaluate a condition tree against the resolver's bound context.
pub fn evaluate(condition: &ConditionExpr, resolver: &VariableResolver) -> bool {
    match condition {
        ConditionExpr::Simple {
            field,
            operator,
            value,
        } => {
            let field = resolver.resolve(field);
            let value = resolver.resolve_value(value);
            apply_operator(*operator, &field, &value)
        }
        ConditionExpr::And { conditions } => conditions.iter().all(|c| evaluate(c, resolver)),
        ConditionExpr::Or { conditions } => conditions.iter().any(|c| evaluate(c, resolver)),
        ConditionExpr::Not { condition } => !evaluate(condition, resolver),
    }
}

fn apply_operator(op: CompareOp, field: &serde_json::Value, value: &serde_json::Value) -> bool {
    match op {
        CompareOp::Equals => operators::equals(field, value),
        CompareOp::NotEquals => !operators::equals(field, value),
        CompareOp::GreaterThan => operators::compare(field, value, |a, b| a > b),
        CompareOp::LessThan => operators::compare(field, value, |a, b| a < b),
        CompareOp::GreaterOrEqual => operators::compare(field, value, |a, b| a >= b),
        CompareOp::LessOrEqual => operators::compare(field, value, |a, b| a <= b),
        CompareOp::Contains => operators::contains(field, value),
        CompareOp::NotContains => !operators::contains(field, value),
        CompareOp::StartsWith => operators::starts_with(field, value),
        CompareOp::EndsWith => operators::ends_with(field, value),
        CompareOp::IsEmpty => operators::is_empty(field),
        CompareOp::IsNotEmpty => !operators::is_empty(field),
        CompareOp::In => operators::in_list(field, value),
        CompareOp::NotIn => !operators::in_list(field, value),
        CompareOp::Matches => operators::matches(field, value),
        CompareOp::Unknown => false,
    }
}
