//! Zero-argument builtin functions callable as `{{name()}}`.

use chrono::Utc;
use serde_json::Value;

/// Invoke a builtin by name. Unknown names resolve as "no value".
pub fn call_builtin(name: &str) -> Option<Value> {
    match name {
        "now" => Some(Value::String(Utc::now().to_rfc3339())),
        "today" => Some(Value::String(Utc::now().format("%Y-%m-%d").to_string())),
        "uuid" => Some(Value::String(uuid::Uuid::new_v4().to_string())),
        _ => None,
    }
}
