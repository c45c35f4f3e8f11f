//! Template resolution against a run context.
//!
//! A template that is entirely one `{{expr}}` resolves to the value with
//! its native type preserved; embedded occurrences substitute textually,
//! with non-scalars rendered as compact JSON and missing values as the
//! empty string.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::functions::call_builtin;
use super::parser::{parse_expr, Expr, PathSegment};
use super::transforms;

fn template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid template regex"))
}

fn whole_template_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\{\{([^{}]+)\}\}$").expect("valid template regex"))
}

/// Resolution outcome. `Missing` is the unified "no value" result for
/// absent keys, out-of-range indexes, and malformed expressions, distinct
/// from a present `null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Found(Value),
    Missing,
}

impl Resolved {
    pub fn into_value(self) -> Value {
        match self {
            Resolved::Found(v) => v,
            Resolved::Missing => Value::Null,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Resolved::Missing)
    }
}

/// Resolves `{{...}}` expressions against one run context.
pub struct VariableResolver<'a> {
    context: &'a Map<String, Value>,
}

impl<'a> VariableResolver<'a> {
    pub fn new(context: &'a Map<String, Value>) -> Self {
        VariableResolver { context }
    }

    /// Resolve a template string.
    pub fn resolve(&self, template: &str) -> Value {
        if let Some(caps) = whole_template_re().captures(template) {
            return self.resolve_expr(&caps[1]).into_value();
        }
        if !template.contains("{{") {
            return Value::String(template.to_string());
        }
        let replaced = template_re().replace_all(template, |caps: &regex::Captures| {
            substitution_text(self.resolve_expr(&caps[1]))
        });
        Value::String(replaced.into_owned())
    }

    /// Recursively resolve every template string inside a value.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve(s),
            Value::Array(arr) => Value::Array(arr.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve every template string inside a config map.
    pub fn resolve_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.resolve_value(v)))
            .collect()
    }

    /// Resolve the inside of one `{{...}}` occurrence.
    pub fn resolve_expr(&self, raw: &str) -> Resolved {
        let Some(parsed) = parse_expr(raw) else {
            return Resolved::Missing;
        };
        let head = match &parsed.expr {
            Expr::Call(name) => match call_builtin(name) {
                Some(v) => Resolved::Found(v),
                None => Resolved::Missing,
            },
            Expr::Path(segments) => self.lookup(segments),
        };
        match head {
            Resolved::Missing => Resolved::Missing,
            Resolved::Found(mut value) => {
                for pipe in &parsed.pipes {
                    value = transforms::apply(pipe, value);
                }
                Resolved::Found(value)
            }
        }
    }

    fn lookup(&self, segments: &[PathSegment]) -> Resolved {
        let mut current: Option<&Value> = None;
        for (i, segment) in segments.iter().enumerate() {
            let next = if i == 0 {
                self.context.get(&segment.key)
            } else {
                match current {
                    Some(Value::Object(obj)) => obj.get(&segment.key),
                    _ => None,
                }
            };
            let Some(mut value) = next else {
                return Resolved::Missing;
            };
            if let Some(index) = segment.index {
                match value {
                    Value::Array(arr) => match arr.get(index) {
                        Some(item) => value = item,
                        None => return Resolved::Missing,
                    },
                    _ => return Resolved::Missing,
                }
            }
            current = Some(value);
        }
        match current {
            Some(v) => Resolved::Found(v.clone()),
            None => Resolved::Missing,
        }
    }
}

fn substitution_text(resolved: Resolved) -> String {
    match resolved {
        Resolved::Missing => String::new(),
        Resolved::Found(Value::Null) => String::new(),
        Resolved::Found(Value::String(s)) => s,
        Resolved::Found(Value::Number(n)) => n.to_string(),
        Resolved::Found(Value::Bool(b)) => b.to_string(),
        Resolved::Found(other) => serde_json::to_string(&other).unwrap_or_default(),
    }
}

/// Extract the set of bare variable paths a template references, pipes and
/// function calls stripped. Used for static validation before execution.
pub fn extract_variables(template: &str) -> BTreeSet<String> {
    template_re()
        .captures_iter(template)
        .filter_map(|caps| parse_expr(&caps[1]))
        .filter_map(|expr| expr.variable_path())
        .collect()
}
