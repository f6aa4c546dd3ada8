//! Strongly-typed trace and span identifiers
//!
//! Identifiers are opaque random tokens rendered as lowercase hex: 128 bits
//! for a trace, 64 bits for a span. They are generated once at creation from
//! the process entropy source and are used only for correlation and
//! serialization, never for ownership.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing an identifier from its hex form fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdError {
    /// The input had the wrong number of characters.
    #[error("expected {expected} hex characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The input contained a non-hex character.
    #[error("invalid hex digit in identifier")]
    InvalidHex,
}

/// Identifier shared by every span of one end-to-end trace.
///
/// 128-bit random token, rendered as 32 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId(u128);

impl TraceId {
    /// The all-zero identifier used by the inert span variant.
    pub const NIL: Self = Self(0);

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Whether this is the all-zero identifier.
    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }

    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for TraceId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, 32).map(Self)
    }
}

impl Serialize for TraceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TraceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Identifier of a single span within a trace.
///
/// 64-bit random token, rendered as 16 lowercase hex characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId(u64);

impl SpanId {
    /// The all-zero identifier used by the inert span variant.
    pub const NIL: Self = Self(0);

    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(rand::random())
    }

    /// Whether this is the all-zero identifier.
    pub fn is_nil(&self) -> bool {
        self.0 == 0
    }

    pub fn from_u64(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for SpanId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex(s, 16).map(|v| Self(v as u64))
    }
}

impl Serialize for SpanId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SpanId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_hex(s: &str, expected: usize) -> Result<u128, ParseIdError> {
    if s.len() != expected {
        return Err(ParseIdError::InvalidLength {
            expected,
            actual: s.len(),
        });
    }
    if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseIdError::InvalidHex);
    }
    u128::from_str_radix(s, 16).map_err(|_| ParseIdError::InvalidHex)
}
