//! Record store contract and its SQLite implementation.
//!
//! # Responsibility
//! - Define the narrow set of store operations the search and update paths
//!   need: point lookup, keyset scan, ranked full-text query, count, insert,
//!   atomic conditional write, sequences and batched secondary lookups.
//! - Keep SQL details out of search and service orchestration.
//!
//! # Invariants
//! - Every operation is scoped to one tenant.
//! - `compare_and_set` is a single atomic statement; callers never need a
//!   separate read to guard a write.
//! - Secondary lookups take a whole page of keys and answer in one round trip.

use crate::db::DbError;
use crate::model::entity::EntityKind;
use crate::model::query::{Predicate, SortOrder};
use crate::model::record::{FieldValue, Record, RecordId, TenantId, Version};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite_store;

pub use sqlite_store::SqliteRecordStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-layer error.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// A uniqueness constraint rejected the write.
    UniqueViolation(String),
    /// The running statement was interrupted by a cancel token.
    Interrupted,
    InvalidData(String),
    /// Connection has not been migrated to the schema this build expects.
    NotReady {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::UniqueViolation(message) => write!(f, "unique constraint violated: {message}"),
            Self::Interrupted => write!(f, "store call interrupted"),
            Self::InvalidData(message) => write!(f, "invalid persisted record data: {message}"),
            Self::NotReady {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        sqlite_store::classify_sqlite_error(value)
    }
}

/// Keyset position and direction for paged reads.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyset {
    /// Sort column; always a sortable schema field.
    pub field: &'static str,
    pub order: SortOrder,
    /// Resume strictly after this `(sort value, id)` pair.
    pub after: Option<(FieldValue, RecordId)>,
}

/// Filtered scan with every predicate pushed down.
#[derive(Debug, Clone, Copy)]
pub struct ScanQuery<'a> {
    pub kind: EntityKind,
    pub tenant_id: TenantId,
    pub predicates: &'a [Predicate],
    /// Case-insensitive substring terms over the search columns; all required.
    pub contains: &'a [String],
    pub keyset: &'a Keyset,
    /// Rows to fetch, including any look-ahead row.
    pub fetch: u32,
}

/// Ranked full-text query. Rows carry a derived `search_rank`.
#[derive(Debug, Clone, Copy)]
pub struct FullTextQuery<'a> {
    pub kind: EntityKind,
    pub tenant_id: TenantId,
    pub match_expression: &'a str,
    pub predicates: &'a [Predicate],
    pub keyset: &'a Keyset,
    pub fetch: u32,
}

/// Text condition applied by [`RecordStore::count`].
#[derive(Debug, Clone, Copy)]
pub enum TextFilter<'a> {
    FullText(&'a str),
    Contains(&'a [String]),
}

/// Best-effort count over pushed-down conditions.
#[derive(Debug, Clone, Copy)]
pub struct CountQuery<'a> {
    pub kind: EntityKind,
    pub tenant_id: TenantId,
    pub text: Option<TextFilter<'a>>,
    pub predicates: &'a [Predicate],
}

/// Atomic update of one record.
///
/// With `expected_version` set, the write applies only when the stored
/// version still equals it. The new version is `max(now_ms, version + 1)`.
#[derive(Debug, Clone, Copy)]
pub struct ConditionalWrite<'a> {
    pub kind: EntityKind,
    pub tenant_id: TenantId,
    pub id: RecordId,
    pub changes: &'a BTreeMap<String, FieldValue>,
    pub expected_version: Option<Version>,
    pub now_ms: i64,
}

/// Grouped counts of related rows, keyed by the owning record id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    ActiveEnrollmentsPerClass,
    ActiveEnrollmentsPerStudent,
}

/// Display labels resolved from a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    InstructorName,
}

/// Store operations used by search, enrichment and the update paths.
pub trait RecordStore {
    /// Loads one record regardless of its active/inactive status.
    fn fetch(&self, kind: EntityKind, tenant_id: TenantId, id: RecordId)
        -> StoreResult<Option<Record>>;
    /// Keyset-ordered scan. Returns at most `query.fetch` rows.
    fn scan(&self, query: &ScanQuery<'_>) -> StoreResult<Vec<Record>>;
    /// Full-text query ordered like `scan`. Fails when the index is unusable.
    fn full_text(&self, query: &FullTextQuery<'_>) -> StoreResult<Vec<Record>>;
    fn count(&self, query: &CountQuery<'_>) -> StoreResult<u64>;
    fn insert(&self, record: &Record) -> StoreResult<()>;
    /// Returns the updated record, or `None` when no row matched.
    fn compare_and_set(&self, write: &ConditionalWrite<'_>) -> StoreResult<Option<Record>>;
    /// Atomically advances and returns a tenant-scoped counter.
    fn next_sequence(&self, tenant_id: TenantId, scope: &str) -> StoreResult<u64>;
    /// Whether `value` is already used as `kind`'s identifier in this tenant.
    fn identifier_taken(&self, kind: EntityKind, tenant_id: TenantId, value: &str)
        -> StoreResult<bool>;
    /// Keys with no related rows are absent from the result.
    fn count_related(
        &self,
        relation: Relation,
        tenant_id: TenantId,
        keys: &[String],
    ) -> StoreResult<HashMap<String, i64>>;
    /// Keys that resolve to nothing are absent from the result.
    fn resolve_labels(
        &self,
        lookup: Lookup,
        tenant_id: TenantId,
        keys: &[String],
    ) -> StoreResult<HashMap<String, String>>;
}
