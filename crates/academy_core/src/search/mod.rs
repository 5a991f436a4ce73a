//! Cursor-paginated search over tenant records.
//!
//! # Responsibility
//! - Choose a full-text or filtered plan per call and fall back transparently.
//! - Keep pagination stable with keyset cursors and an id tie-break.
//!
//! # Invariants
//! - Engine failures never reach callers; interruptions always do.
//! - A cursor is only accepted by a query with the same entity, field and order.

use crate::cancel::Interrupted;
use crate::model::validation::ValidationError;
use crate::repo::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod coordinator;
pub mod cursor;
pub mod fts;
pub mod plan;

pub use coordinator::SearchCoordinator;
pub use cursor::{CursorCodec, CursorPosition};
pub use plan::{FilteredPlan, FullTextPlan, Plan};

pub type SearchResult<T> = Result<T, SearchError>;

/// Search failure surfaced to callers.
#[derive(Debug)]
pub enum SearchError {
    Validation(ValidationError),
    Interrupted(Interrupted),
    /// The filtered path itself failed; nothing left to fall back to.
    Store(StoreError),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Interrupted(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Interrupted(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<ValidationError> for SearchError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<Interrupted> for SearchError {
    fn from(value: Interrupted) -> Self {
        Self::Interrupted(value)
    }
}
