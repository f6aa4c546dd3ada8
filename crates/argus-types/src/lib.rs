//! # Argus Types - Core types for the Argus tracing SDK
//!
//! Strongly-typed trace/span identifiers and the span status vocabulary
//! shared by the tracing core and its collaborators.

pub mod ids;
pub mod status;

pub use ids::{ParseIdError, SpanId, TraceId};
pub use status::SpanStatus;
