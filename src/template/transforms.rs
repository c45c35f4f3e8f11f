//! Pipe transforms applied with `{{expr|name}}`.
//!
//! Transforms never fail a resolution: an unknown name is a no-op and a
//! transform whose input has the wrong shape returns the value untouched.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

/// Apply a named transform, returning the input unchanged when the name is
/// unknown or the value shape does not fit.
pub fn apply(name: &str, value: Value) -> Value {
    match name {
        "upper" => map_string(value, |s| s.to_uppercase()),
        "lower" => map_string(value, |s| s.to_lowercase()),
        "title" => map_string(value, title_case),
        "trim" => map_string(value, |s| s.trim().to_string()),
        "length" => length(value),
        "first" => pick(value, |arr| arr.first().cloned()),
        "last" => pick(value, |arr| arr.last().cloned()),
        "sum" => sum(value),
        "min" => numeric_pick(value, |a, b| a < b),
        "max" => numeric_pick(value, |a, b| a > b),
        "join" => join(value),
        "keys" => keys(value),
        "values" => values(value),
        "currency" => currency(value),
        "date" => date(value),
        _ => value,
    }
}

fn map_string(value: Value, f: impl FnOnce(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn length(value: Value) -> Value {
    match &value {
        Value::String(s) => Value::from(s.chars().count()),
        Value::Array(arr) => Value::from(arr.len()),
        Value::Object(obj) => Value::from(obj.len()),
        _ => value,
    }
}

fn pick(value: Value, f: impl FnOnce(&Vec<Value>) -> Option<Value>) -> Value {
    match &value {
        Value::Array(arr) => f(arr).unwrap_or(value),
        _ => value,
    }
}

fn as_numbers(value: &Value) -> Option<Vec<f64>> {
    let arr = value.as_array()?;
    arr.iter().map(Value::as_f64).collect()
}

fn sum(value: Value) -> Value {
    let Some(arr) = value.as_array() else {
        return value;
    };
    if arr.iter().all(|v| v.as_i64().is_some()) {
        return Value::from(arr.iter().filter_map(Value::as_i64).sum::<i64>());
    }
    match as_numbers(&value) {
        Some(nums) => Value::from(nums.iter().sum::<f64>()),
        None => value,
    }
}

fn numeric_pick(value: Value, better: impl Fn(f64, f64) -> bool) -> Value {
    let Some(nums) = as_numbers(&value) else {
        return value;
    };
    let Some(arr) = value.as_array() else {
        return value;
    };
    let mut best: Option<usize> = None;
    for (i, n) in nums.iter().enumerate() {
        match best {
            Some(b) if !better(*n, nums[b]) => {}
            _ => best = Some(i),
        }
    }
    match best {
        Some(i) => arr[i].clone(),
        None => value,
    }
}

fn join(value: Value) -> Value {
    let Some(arr) = value.as_array() else {
        return value;
    };
    let mut parts = Vec::with_capacity(arr.len());
    for item in arr {
        match item {
            Value::String(s) => parts.push(s.clone()),
            Value::Number(n) => parts.push(n.to_string()),
            Value::Bool(b) => parts.push(b.to_string()),
            _ => return value,
        }
    }
    Value::String(parts.join(", "))
}

fn keys(value: Value) -> Value {
    match &value {
        Value::Object(obj) => Value::Array(obj.keys().map(|k| Value::String(k.clone())).collect()),
        _ => value,
    }
}

fn values(value: Value) -> Value {
    match value {
        Value::Object(obj) => Value::Array(obj.into_iter().map(|(_, v)| v).collect()),
        other => other,
    }
}

fn currency(value: Value) -> Value {
    let Some(n) = value.as_f64() else {
        return value;
    };
    Value::String(format_currency(n))
}

fn format_currency(n: f64) -> String {
    let sign = if n < 0.0 { "-" } else { "" };
    let cents = (n.abs() * 100.0).round() as u64;
    let whole = cents / 100;
    let frac = cents % 100;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{}${}.{:02}", sign, grouped, frac)
}

fn date(value: Value) -> Value {
    let parsed: Option<DateTime<Utc>> = match &value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    };
    match parsed {
        Some(dt) => Value::String(dt.format("%Y-%m-%d").to_string()),
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_transforms() {
        assert_eq!(apply("upper", json!("abc")), json!("ABC"));
        assert_eq!(apply("lower", json!("ABC")), json!("abc"));
        assert_eq!(apply("title", json!("hello wide world")), json!("Hello Wide World"));
        assert_eq!(apply("trim", json!("  x  ")), json!("x"));
    }

    #[test]
    fn test_length() {
        assert_eq!(apply("length", json!("héllo")), json!(5));
        assert_eq!(apply("length", json!([1, 2, 3])), json!(3));
        assert_eq!(apply("length", json!({"a": 1})), json!(1));
        // Wrong shape passes through.
        assert_eq!(apply("length", json!(42)), json!(42));
    }

    #[test]
    fn test_list_picks() {
        assert_eq!(apply("first", json!([5, 6, 7])), json!(5));
        assert_eq!(apply("last", json!([5, 6, 7])), json!(7));
        assert_eq!(apply("first", json!([])), json!([]));
        assert_eq!(apply("min", json!([4, 1, 9])), json!(1));
        assert_eq!(apply("max", json!([4, 1.5, 9])), json!(9));
        assert_eq!(apply("max", json!(["a", 1])), json!(["a", 1]));
    }

    #[test]
    fn test_sum() {
        assert_eq!(apply("sum", json!([1, 2, 3])), json!(6));
        assert_eq!(apply("sum", json!([1.5, 2.5])), json!(4.0));
        assert_eq!(apply("sum", json!([1, "x"])), json!([1, "x"]));
    }

    #[test]
    fn test_join() {
        assert_eq!(apply("join", json!(["a", "b"])), json!("a, b"));
        assert_eq!(apply("join", json!([1, true])), json!("1, true"));
        assert_eq!(apply("join", json!([{"a": 1}])), json!([{"a": 1}]));
    }

    #[test]
    fn test_keys_values() {
        assert_eq!(apply("keys", json!({"a": 1, "b": 2})), json!(["a", "b"]));
        assert_eq!(apply("values", json!({"a": 1, "b": 2})), json!([1, 2]));
    }

    #[test]
    fn test_currency() {
        assert_eq!(apply("currency", json!(1234.5)), json!("$1,234.50"));
        assert_eq!(apply("currency", json!(-99)), json!("-$99.00"));
        assert_eq!(apply("currency", json!(1000000)), json!("$1,000,000.00"));
        assert_eq!(apply("currency", json!("nope")), json!("nope"));
    }

    #[test]
    fn test_date() {
        assert_eq!(apply("date", json!(0)), json!("1970-01-01"));
        assert_eq!(
            apply("date", json!("2024-03-05T10:30:00Z")),
            json!("2024-03-05")
        );
        assert_eq!(apply("date", json!("not a date")), json!("not a date"));
    }

    #[test]
    fn test_unknown_transform_is_noop() {
        assert_eq!(apply("reverse", json!("abc")), json!("abc"));
    }
}
