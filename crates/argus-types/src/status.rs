//! Span status vocabulary
//!
//! Terminal outcomes a span can record. The set mirrors the gRPC status
//! space so statuses survive translation across protocol boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a finished span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// Operation completed successfully.
    Ok,
    /// Operation was cancelled, typically by the caller.
    Cancelled,
    /// An internal error occurred.
    InternalError,
    /// An unknown error occurred.
    UnknownError,
    /// The caller supplied an invalid argument.
    InvalidArgument,
    /// The operation was still unfinished when its owner completed.
    DeadlineExceeded,
    /// A requested entity was not found.
    NotFound,
    /// The entity being created already exists.
    AlreadyExists,
    /// The caller lacks permission for the operation.
    PermissionDenied,
    /// A resource quota was exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted.
    Aborted,
    /// The operation ran past its valid range.
    OutOfRange,
    /// The operation is not implemented.
    Unimplemented,
    /// The service is unavailable.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
    /// The request lacked valid authentication.
    Unauthenticated,
}

impl SpanStatus {
    /// Derive a status from an HTTP response code, for instrumentation that
    /// wraps outbound requests.
    pub fn from_http_status_code(code: u16) -> Self {
        match code {
            200..=299 => Self::Ok,
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::AlreadyExists,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            500 => Self::InternalError,
            501 => Self::Unimplemented,
            503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            _ => Self::UnknownError,
        }
    }

    /// Whether this status represents a successful outcome.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Canonical wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Cancelled => "cancelled",
            Self::InternalError => "internal_error",
            Self::UnknownError => "unknown_error",
            Self::InvalidArgument => "invalid_argument",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::FailedPrecondition => "failed_precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out_of_range",
            Self::Unimplemented => "unimplemented",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data_loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_mapping_success_range() {
        assert_eq!(SpanStatus::from_http_status_code(200), SpanStatus::Ok);
        assert_eq!(SpanStatus::from_http_status_code(204), SpanStatus::Ok);
    }

    #[test]
    fn test_http_mapping_client_errors() {
        assert_eq!(
            SpanStatus::from_http_status_code(404),
            SpanStatus::NotFound
        );
        assert_eq!(
            SpanStatus::from_http_status_code(429),
            SpanStatus::ResourceExhausted
        );
    }

    #[test]
    fn test_http_mapping_unknown_code() {
        assert_eq!(
            SpanStatus::from_http_status_code(418),
            SpanStatus::UnknownError
        );
    }

    #[test]
    fn test_serde_representation_is_snake_case() {
        let json = serde_json::to_string(&SpanStatus::DeadlineExceeded).unwrap();
        assert_eq!(json, "\"deadline_exceeded\"");
        let back: SpanStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SpanStatus::DeadlineExceeded);
    }

    #[test]
    fn test_display_matches_wire_name() {
        assert_eq!(SpanStatus::Ok.to_string(), "ok");
        assert_eq!(SpanStatus::InternalError.to_string(), "internal_error");
    }
}
