//! Record and attribute value types.
//!
//! # Invariants
//! - `Record::fields` holds stored attributes only; enrichment output lives in
//!   `Record::derived` and is never written back.
//! - `FieldValue` ordering matches SQLite's: NULL < numbers < text, text
//!   compared byte-wise.

use crate::model::entity::EntityKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Primary identifier of a record.
pub type RecordId = Uuid;

/// Tenant (academy) identifier scoping every record.
pub type TenantId = Uuid;

static NULL_VALUE: FieldValue = FieldValue::Null;

/// Typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Short type label used in validation messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
        }
    }

    /// Total order used for sorting and keyset comparison.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::Text(_), _) => Ordering::Greater,
            (_, Self::Text(_)) => Ordering::Less,
            (a, b) => a.numeric().total_cmp(&b.numeric()),
        }
    }

    fn numeric(&self) -> f64 {
        match self {
            Self::Bool(value) => f64::from(u8::from(*value)),
            Self::Integer(value) => *value as f64,
            Self::Real(value) => *value,
            Self::Null | Self::Text(_) => 0.0,
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Optimistic-concurrency stamp: epoch milliseconds of the last write.
///
/// Advanced only by the store; successive versions of one record are
/// strictly increasing even when writes land in the same millisecond.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the version a write at `now_ms` must stamp after `self`.
    pub fn successor(self, now_ms: i64) -> Self {
        Self(now_ms.max(self.0.saturating_add(1)))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant-scoped entity row plus enrichment output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub kind: EntityKind,
    pub id: RecordId,
    pub tenant_id: TenantId,
    pub fields: BTreeMap<String, FieldValue>,
    /// Derived attributes attached after fetch (counts, labels, rank).
    pub derived: BTreeMap<String, FieldValue>,
    pub version: Version,
}

impl Record {
    /// Returns a stored attribute, or `Null` when absent.
    pub fn field(&self, name: &str) -> &FieldValue {
        self.fields.get(name).unwrap_or(&NULL_VALUE)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.field(name).as_text()
    }

    pub fn derived(&self, name: &str) -> Option<&FieldValue> {
        self.derived.get(name)
    }

    /// Orders two records by `field` with the id as tie-break.
    pub fn keyset_cmp(&self, other: &Self, field: &str) -> Ordering {
        self.field(field)
            .sort_cmp(other.field(field))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Current epoch milliseconds.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}
