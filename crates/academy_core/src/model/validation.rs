//! Client-facing validation errors.
//!
//! Every variant describes a malformed request (query, cursor or patch). They
//! are never retried automatically.

use crate::model::entity::EntityKind;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    LimitOutOfRange {
        limit: u32,
        max: u32,
    },
    FreeTextTooLong {
        chars: usize,
        max: usize,
    },
    UnknownField {
        kind: EntityKind,
        field: String,
    },
    FieldNotFilterable(String),
    FieldNotSortable(String),
    FieldNotWritable(String),
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    ValueNotAllowed {
        field: String,
        value: String,
    },
    EmptyFilter(String),
    MissingRequired(String),
    EmptyPatch,
    InvalidCursor(String),
    CursorMismatch {
        expected: String,
        found: String,
    },
    Duplicate {
        field: String,
        value: String,
    },
    HasDependents {
        kind: EntityKind,
        dependents: i64,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LimitOutOfRange { limit, max } => {
                write!(f, "limit must be within 1..={max}, got {limit}")
            }
            Self::FreeTextTooLong { chars, max } => {
                write!(f, "search text has {chars} characters; at most {max} allowed")
            }
            Self::UnknownField { kind, field } => {
                write!(f, "unknown field `{field}` for {}", kind.as_str())
            }
            Self::FieldNotFilterable(field) => write!(f, "field `{field}` cannot be filtered"),
            Self::FieldNotSortable(field) => write!(f, "field `{field}` cannot be sorted"),
            Self::FieldNotWritable(field) => write!(f, "field `{field}` cannot be written"),
            Self::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` expects {expected}, got {found}"),
            Self::ValueNotAllowed { field, value } => {
                write!(f, "value `{value}` is not allowed for field `{field}`")
            }
            Self::EmptyFilter(field) => write!(f, "filter on `{field}` has no values"),
            Self::MissingRequired(field) => write!(f, "field `{field}` is required"),
            Self::EmptyPatch => write!(f, "update contains no changes"),
            Self::InvalidCursor(message) => write!(f, "invalid cursor: {message}"),
            Self::CursorMismatch { expected, found } => write!(
                f,
                "cursor was issued for `{found}` but query sorts by `{expected}`"
            ),
            Self::Duplicate { field, value } => {
                write!(f, "`{value}` is already used for field `{field}`")
            }
            Self::HasDependents { kind, dependents } => write!(
                f,
                "{} still has {dependents} active dependent record(s)",
                kind.as_str()
            ),
        }
    }
}

impl Error for ValidationError {}
