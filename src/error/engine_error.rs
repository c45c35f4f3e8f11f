use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Error classification. `Validation` and `RetryExhausted` are never
/// recoverable; `Cancelled` is terminal but not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    Execution,
    Timeout,
    RetryExhausted,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Execution => "execution",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RetryExhausted => "retry-exhausted",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Structured engine error carrying the classification, the originating
/// node (when known), a free-form details map, and the recoverable flag
/// that drives retry eligibility.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    pub recoverable: bool,
}

impl EngineError {
    fn new(kind: ErrorKind, message: impl Into<String>, recoverable: bool) -> Self {
        EngineError {
            kind,
            message: message.into(),
            node_id: None,
            details: Map::new(),
            recoverable,
        }
    }

    /// Validation failure: blocks execution start or node dispatch entirely.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message, false)
    }

    /// Action/execution failure, recoverable by default.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message, true)
    }

    /// Execution failure explicitly marked non-recoverable.
    pub fn execution_fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message, false)
    }

    /// Timed-out action invocation, eligible for retry.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message, true)
    }

    /// Terminal wrapper raised after the retry budget is spent. Embeds the
    /// retry count and the last underlying error in the details map.
    pub fn retry_exhausted(retries: u32, last: &EngineError) -> Self {
        let mut err = Self::new(
            ErrorKind::RetryExhausted,
            format!("retries exhausted after {} attempts: {}", retries, last.message),
            false,
        );
        err.node_id = last.node_id.clone();
        err.details
            .insert("retries".into(), Value::from(retries));
        err.details
            .insert("last_error".into(), Value::String(last.message.clone()));
        err.details
            .insert("last_kind".into(), Value::String(last.kind.to_string()));
        err
    }

    /// Execution cancelled by an external caller. Terminal, not a failure.
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "execution cancelled", false)
    }

    /// Attach the originating node id.
    pub fn at_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Attach a detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::validation(format!("serialization error: {}", e))
    }
}
