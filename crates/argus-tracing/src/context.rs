//! Immutable span identity and trace propagation
//!
//! A [`SpanContext`] is created when a span starts and never mutated
//! afterwards; a span that needs a different context is a new span.

use argus_types::{ParseIdError, SpanId, TraceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tri-state decision on whether a trace's data is kept for transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingDecision {
    /// The trace is recorded and submitted.
    Sampled,
    /// The trace is dropped.
    Unsampled,
    /// No decision has been made yet.
    Deferred,
}

impl SamplingDecision {
    /// Build a decision from an optional boolean flag.
    pub fn from_flag(sampled: Option<bool>) -> Self {
        match sampled {
            Some(true) => Self::Sampled,
            Some(false) => Self::Unsampled,
            None => Self::Deferred,
        }
    }

    /// The decision as an optional boolean flag.
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Sampled => Some(true),
            Self::Unsampled => Some(false),
            Self::Deferred => None,
        }
    }

    /// Whether the trace is positively sampled.
    pub fn is_sampled(&self) -> bool {
        matches!(self, Self::Sampled)
    }
}

/// Immutable identifying and correlation data for one span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    /// Identifier shared by all spans of the trace.
    pub trace_id: TraceId,

    /// Identifier of this span.
    pub span_id: SpanId,

    /// Identifier of the logical parent span, if any.
    ///
    /// A weak back-reference: it carries no ownership and the parent may
    /// already be finished.
    pub parent_span_id: Option<SpanId>,

    /// Short name of the operation the span measures.
    pub operation: String,

    /// Free-form description of the concrete work.
    pub description: Option<String>,

    /// Sampling decision inherited from the trace root.
    pub sampled: SamplingDecision,
}

impl SpanContext {
    /// Create the context for a new trace root.
    pub fn new_root(operation: impl Into<String>, sampled: SamplingDecision) -> Self {
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            parent_span_id: None,
            operation: operation.into(),
            description: None,
            sampled,
        }
    }

    /// Create a child context under this span.
    pub fn child_of(&self, operation: impl Into<String>, description: Option<String>) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::generate(),
            parent_span_id: Some(self.span_id),
            operation: operation.into(),
            description,
            sampled: self.sampled,
        }
    }

    /// Create a root context that continues a trace received from an
    /// upstream service.
    pub fn continue_from(header: &TraceHeader, operation: impl Into<String>) -> Self {
        Self {
            trace_id: header.trace_id,
            span_id: SpanId::generate(),
            parent_span_id: Some(header.span_id),
            operation: operation.into(),
            description: None,
            sampled: header.sampled,
        }
    }

    /// Context carried by the inert span variant.
    pub(crate) fn disabled() -> Self {
        Self {
            trace_id: TraceId::NIL,
            span_id: SpanId::NIL,
            parent_span_id: None,
            operation: String::new(),
            description: None,
            sampled: SamplingDecision::Unsampled,
        }
    }

    /// The propagation header identifying this span to downstream calls.
    pub fn trace_header(&self) -> TraceHeader {
        TraceHeader {
            trace_id: self.trace_id,
            span_id: self.span_id,
            sampled: self.sampled,
        }
    }
}

/// Error returned when parsing a propagation header fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseHeaderError {
    /// The header did not have two or three `-`-separated segments, or the
    /// sampling digit was not `0` or `1`.
    #[error("malformed trace header")]
    Malformed,

    /// One of the identifier segments was not valid hex.
    #[error(transparent)]
    Id(#[from] ParseIdError),
}

/// Trace propagation header value.
///
/// Rendered as `{trace_id}-{span_id}-{flag}` where the flag is `1` for a
/// sampled trace, `0` for an unsampled one, and omitted entirely while the
/// decision is deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceHeader {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: SamplingDecision,
}

impl fmt::Display for TraceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sampled.as_flag() {
            Some(true) => write!(f, "{}-{}-1", self.trace_id, self.span_id),
            Some(false) => write!(f, "{}-{}-0", self.trace_id, self.span_id),
            None => write!(f, "{}-{}", self.trace_id, self.span_id),
        }
    }
}

impl FromStr for TraceHeader {
    type Err = ParseHeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        let (trace_id, span_id, flag) = match parts.as_slice() {
            [trace_id, span_id] => (*trace_id, *span_id, None),
            [trace_id, span_id, flag] => (*trace_id, *span_id, Some(*flag)),
            _ => return Err(ParseHeaderError::Malformed),
        };

        let sampled = match flag {
            None => SamplingDecision::Deferred,
            Some("1") => SamplingDecision::Sampled,
            Some("0") => SamplingDecision::Unsampled,
            Some(_) => return Err(ParseHeaderError::Malformed),
        };

        Ok(Self {
            trace_id: trace_id.parse()?,
            span_id: span_id.parse()?,
            sampled,
        })
    }
}
