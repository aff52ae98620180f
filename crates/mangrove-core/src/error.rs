//! Error types for the core crate.

use std::fmt;

use thiserror::Error;

use crate::types::Type;

/// Which temporal literal form failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalKind {
    /// A `YYYY-MM-DD` date.
    Date,
    /// An `HH:MM:SS[.sss]` time of day.
    Time,
    /// An ISO-8601 UTC instant.
    Timestamp,
    /// An ISO-8601 duration.
    Interval,
}

impl fmt::Display for TemporalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamp => "timestamp",
            Self::Interval => "interval",
        };
        write!(f, "{name}")
    }
}

/// A temporal literal that did not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind} literal {input:?}: {hint}")]
pub struct DateFormatError {
    /// The temporal form that was expected.
    pub kind: TemporalKind,
    /// The offending input.
    pub input: String,
    /// What was expected instead.
    pub hint: String,
}

impl DateFormatError {
    /// Creates a new date-format error.
    #[must_use]
    pub fn new(kind: TemporalKind, input: impl Into<String>, hint: impl Into<String>) -> Self {
        Self { kind, input: input.into(), hint: hint.into() }
    }
}

/// An observed type that does not fit where it was used.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("type mismatch: expected {expected}, got {observed}{}", hint.as_ref().map(|h| format!(" ({h})")).unwrap_or_default())]
pub struct TypeError {
    /// The type required at the use site.
    pub expected: Type,
    /// The type that was actually observed.
    pub observed: Type,
    /// An optional refinement of what went wrong.
    pub hint: Option<String>,
}

impl TypeError {
    /// Creates a new type error.
    #[must_use]
    pub fn new(expected: Type, observed: Type, hint: Option<String>) -> Self {
        Self { expected, observed, hint }
    }
}
