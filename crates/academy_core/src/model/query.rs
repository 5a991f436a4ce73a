//! Search query, predicate and page types.
//!
//! # Invariants
//! - A validated page size is always within `1..=max_limit`.
//! - `Page::has_more` is `true` exactly when `Page::next_cursor` is set.

use crate::model::entity::{EntitySchema, FieldSpec};
use crate::model::record::{FieldValue, Record, TenantId};
use crate::model::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// Requested sort. The record id is always the implicit tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }
}

impl Display for SortSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.field, self.order.as_str())
    }
}

/// One filter condition on a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    Eq(FieldValue),
    AnyOf(Vec<FieldValue>),
    /// Inclusive bounds; at least one must be set.
    Range {
        min: Option<FieldValue>,
        max: Option<FieldValue>,
    },
}

/// Listing request for one entity within one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub tenant_id: TenantId,
    pub free_text: Option<String>,
    #[serde(default)]
    pub filters: BTreeMap<String, FilterValue>,
    /// Defaults to the entity's default sort, ascending.
    pub sort: Option<SortSpec>,
    /// Opaque token from a previous page.
    pub cursor: Option<String>,
    /// Defaults to `search.default_limit`.
    pub limit: Option<u32>,
    /// Request a best-effort `total_count`.
    #[serde(default)]
    pub include_total: bool,
}

impl SearchQuery {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            free_text: None,
            filters: BTreeMap::new(),
            sort: None,
            cursor: None,
            limit: None,
            include_total: false,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.free_text = Some(text.into());
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, filter: FilterValue) -> Self {
        self.filters.insert(field.into(), filter);
        self
    }

    pub fn sorted_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec::new(field, order));
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn with_total(mut self) -> Self {
        self.include_total = true;
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub items: Vec<Record>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    /// Best-effort count over the pushed-down filters; not a paging guarantee.
    pub total_count: Option<u64>,
    /// Enrichment attributes that fell back to their defaults on this page.
    pub degraded: Vec<String>,
}

/// A filter checked against the entity schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: &'static FieldSpec,
    pub filter: FilterValue,
}

impl Predicate {
    /// Validates one `field -> filter` entry.
    pub fn parse(
        schema: &EntitySchema,
        name: &str,
        filter: &FilterValue,
    ) -> Result<Self, ValidationError> {
        let field = schema.require_field(name)?;
        if !field.filterable {
            return Err(ValidationError::FieldNotFilterable(name.to_string()));
        }

        let check = |value: &FieldValue| -> Result<(), ValidationError> {
            if value.is_null() {
                return Ok(());
            }
            field.check_value(value)
        };

        match filter {
            FilterValue::Eq(value) => check(value)?,
            FilterValue::AnyOf(values) => {
                if values.is_empty() {
                    return Err(ValidationError::EmptyFilter(name.to_string()));
                }
                for value in values {
                    if value.is_null() {
                        return Err(ValidationError::TypeMismatch {
                            field: name.to_string(),
                            expected: "non-null values",
                            found: "null",
                        });
                    }
                    check(value)?;
                }
            }
            FilterValue::Range { min, max } => {
                let bounds = [min.as_ref(), max.as_ref()];
                if bounds.iter().all(|bound| bound.map_or(true, FieldValue::is_null)) {
                    return Err(ValidationError::EmptyFilter(name.to_string()));
                }
                for bound in bounds.into_iter().flatten() {
                    check(bound)?;
                }
            }
        }

        Ok(Self {
            field,
            filter: filter.clone(),
        })
    }

    /// Evaluates the predicate in memory with store semantics.
    pub fn matches(&self, record: &Record) -> bool {
        let value = record.field(self.field.name);
        match &self.filter {
            FilterValue::Eq(FieldValue::Null) => value.is_null(),
            FilterValue::Eq(expected) => !value.is_null() && value == expected,
            FilterValue::AnyOf(values) => !value.is_null() && values.contains(value),
            FilterValue::Range { min, max } => {
                if value.is_null() {
                    return false;
                }
                let above_min = min
                    .as_ref()
                    .filter(|bound| !bound.is_null())
                    .map_or(true, |bound| value.sort_cmp(bound).is_ge());
                let below_max = max
                    .as_ref()
                    .filter(|bound| !bound.is_null())
                    .map_or(true, |bound| value.sort_cmp(bound).is_le());
                above_min && below_max
            }
        }
    }
}
