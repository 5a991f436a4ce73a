//! Partial updates to a record's stored attributes.
//!
//! # Invariants
//! - A normalized patch only touches writable fields of its entity.
//! - Blank strings become `Null`, so required fields reject them.
//! - `version`, `id`, `tenant_id` and `created_at` are never client-writable.

use crate::model::entity::{EntitySchema, FieldType};
use crate::model::record::FieldValue;
use crate::model::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field assignments requested by a caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Patch {
    changes: BTreeMap<String, FieldValue>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.changes.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.changes.insert(field.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.changes.get(field)
    }

    /// Checks every assignment against `schema` and returns the cleaned set.
    pub fn normalize(
        &self,
        schema: &EntitySchema,
    ) -> Result<BTreeMap<String, FieldValue>, ValidationError> {
        if self.changes.is_empty() {
            return Err(ValidationError::EmptyPatch);
        }

        let mut normalized = BTreeMap::new();
        for (name, value) in &self.changes {
            let field = schema.require_field(name)?;
            if !field.writable {
                return Err(ValidationError::FieldNotWritable(name.clone()));
            }
            let value = normalize_value(field.field_type, value);
            field.check_value(&value)?;
            normalized.insert(name.clone(), value);
        }
        Ok(normalized)
    }
}

/// Trims text and maps blank text to `Null`; required fields then fail the
/// schema check instead of storing an empty string.
pub(crate) fn normalize_value(field_type: FieldType, value: &FieldValue) -> FieldValue {
    match (field_type, value) {
        (FieldType::Text | FieldType::Date, FieldValue::Text(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                FieldValue::Null
            } else {
                FieldValue::from(trimmed)
            }
        }
        _ => value.clone(),
    }
}
