//! Error types for the tracing core
//!
//! The span API itself never fails: late or invalid calls are silently
//! dropped so instrumentation can never take down the instrumented code.
//! Errors exist only at the submission edge, where sinks touch IO.

use thiserror::Error;

/// Errors produced by submission sinks.
#[derive(Debug, Error)]
pub enum TracingError {
    /// The sink rejected the transaction.
    #[error("submission failed: {0}")]
    Submission(String),

    /// IO error while persisting a transaction.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error while encoding a transaction.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for sink operations.
pub type Result<T> = std::result::Result<T, TracingError>;
