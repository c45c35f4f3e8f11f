//! Comparison operator implementations over resolved JSON values.
//!
//! Every helper is total: inputs of the wrong shape compare as `false`
//! rather than failing, so a mis-typed condition mis-routes instead of
//! aborting the run.

use serde_json::Value;

pub fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Equality with cross-type coercion: numbers compare numerically,
/// numeric strings compare against numbers, "true"/"false" against bools.
pub fn equals(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            match s.to_lowercase().as_str() {
                "true" => *x,
                "false" => !*x,
                _ => false,
            }
        }
        _ => false,
    }
}

/// Numeric comparison; `false` when either side is empty or non-numeric.
pub fn compare(a: &Value, b: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (value_to_f64(a), value_to_f64(b)) {
        (Some(x), Some(y)) => cmp(x, y),
        _ => false,
    }
}

/// String containment, plus membership when the haystack is a list.
pub fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => s.contains(&value_to_string(needle)),
        Value::Array(arr) => arr.iter().any(|item| equals(item, needle)),
        _ => false,
    }
}

pub fn starts_with(value: &Value, prefix: &Value) -> bool {
    value_to_string(value).starts_with(&value_to_string(prefix))
}

pub fn ends_with(value: &Value, suffix: &Value) -> bool {
    value_to_string(value).ends_with(&value_to_string(suffix))
}

/// Empty = missing, falsy, or a zero-length collection/string.
pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(obj) => obj.is_empty(),
    }
}

/// Membership of `value` in the list `options`. A scalar on the right is
/// treated as a single-element list.
pub fn in_list(value: &Value, options: &Value) -> bool {
    match options {
        Value::Array(arr) => arr.iter().any(|item| equals(item, value)),
        Value::Null => false,
        other => equals(other, value),
    }
}

/// Regular-expression match of the pattern against the field text. An
/// invalid pattern evaluates to `false`.
pub fn matches(value: &Value, pattern: &Value) -> bool {
    let Value::String(pattern) = pattern else {
        return false;
    };
    match regex::Regex::new(pattern) {
        Ok(re) => re.is_match(&value_to_string(value)),
        Err(_) => false,
    }
}
