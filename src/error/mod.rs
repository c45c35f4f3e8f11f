//! Error types for the workflow engine.
//!
//! - [`EngineError`] — the single error currency for validation, execution,
//!   timeout, retry-exhaustion, and cancellation failures.
//! - [`ErrorKind`] — closed classification used by retry and recovery logic.

mod engine_error;

pub use engine_error::{EngineError, ErrorKind};

/// Convenience alias for engine-level results.
pub type EngineResult<T> = Result<T, EngineError>;
