//! Entity schemas for students and classes.
//!
//! # Responsibility
//! - Declare each entity's table, full-text index and attribute set.
//! - Declare per-field capabilities: filter, sort, write, full-text push-down.
//!
//! # Invariants
//! - Only names listed here ever reach SQL text; everything else is bound.
//! - Sortable fields are non-null so keyset comparison is total.

use crate::model::record::FieldValue;
use crate::model::validation::ValidationError;
use serde::{Deserialize, Serialize};

/// Entity families served by the data-access layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Student,
    Class,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Class => "class",
        }
    }

    pub fn schema(self) -> &'static EntitySchema {
        match self {
            Self::Student => &STUDENT_SCHEMA,
            Self::Class => &CLASS_SCHEMA,
        }
    }
}

/// Storage type of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Bool,
    /// ISO `YYYY-MM-DD` text.
    Date,
}

impl FieldType {
    fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Date => "date (YYYY-MM-DD)",
        }
    }
}

/// Capabilities of one attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub writable: bool,
    pub sortable: bool,
    pub filterable: bool,
    /// Filter can be evaluated inside the full-text query itself.
    pub full_text_pushdown: bool,
    /// Closed value set; empty means unrestricted.
    pub allowed: &'static [&'static str],
}

impl FieldSpec {
    const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            required: false,
            writable: true,
            sortable: false,
            filterable: false,
            full_text_pushdown: false,
            allowed: &[],
        }
    }

    const fn text(name: &'static str) -> Self {
        Self::new(name, FieldType::Text)
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    const fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    const fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    const fn full_text_pushdown(mut self) -> Self {
        self.full_text_pushdown = true;
        self
    }

    const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = allowed;
        self
    }

    /// Checks that `value` may be stored in this field.
    pub fn check_value(&self, value: &FieldValue) -> Result<(), ValidationError> {
        let type_ok = match (self.field_type, value) {
            (_, FieldValue::Null) => {
                if self.required {
                    return Err(ValidationError::MissingRequired(self.name.to_string()));
                }
                true
            }
            (FieldType::Text, FieldValue::Text(_)) => true,
            (FieldType::Date, FieldValue::Text(text)) => is_iso_date(text),
            (FieldType::Integer, FieldValue::Integer(_)) => true,
            (FieldType::Bool, FieldValue::Bool(_)) => true,
            _ => false,
        };
        if !type_ok {
            return Err(ValidationError::TypeMismatch {
                field: self.name.to_string(),
                expected: self.field_type.label(),
                found: value.type_name(),
            });
        }

        if let FieldValue::Text(text) = value {
            if !self.allowed.is_empty() && !self.allowed.contains(&text.as_str()) {
                return Err(ValidationError::ValueNotAllowed {
                    field: self.name.to_string(),
                    value: text.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Static description of one entity table.
#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub table: &'static str,
    pub fts_table: &'static str,
    pub fields: &'static [FieldSpec],
    /// Columns matched by free text on both search paths.
    pub search_columns: &'static [&'static str],
    /// Human-facing unique code assigned by the identifier generator.
    pub identifier_field: &'static str,
    pub default_sort: &'static str,
    /// Soft-delete flip: field and the value that marks a record inactive.
    pub soft_delete: (&'static str, FieldInactive),
}

/// Value written by a soft delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldInactive {
    Text(&'static str),
    Bool(bool),
}

impl FieldInactive {
    pub fn value(self) -> FieldValue {
        match self {
            Self::Text(value) => FieldValue::from(value),
            Self::Bool(value) => FieldValue::Bool(value),
        }
    }
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Looks up a field or reports it as unknown for this entity.
    pub fn require_field(&self, name: &str) -> Result<&'static FieldSpec, ValidationError> {
        self.field(name).ok_or_else(|| ValidationError::UnknownField {
            kind: self.kind,
            field: name.to_string(),
        })
    }
}

pub const STUDENT_STATUSES: &[&str] = &[
    "active",
    "waiting",
    "inactive",
    "graduated",
    "withdrawn",
    "suspended",
];

static STUDENT_FIELDS: [FieldSpec; 12] = [
    FieldSpec::text("student_number")
        .required()
        .sortable()
        .filterable(),
    FieldSpec::text("name").required().sortable().filterable(),
    FieldSpec::text("phone"),
    FieldSpec::text("email"),
    FieldSpec::text("parent_name"),
    FieldSpec::text("parent_phone"),
    FieldSpec::text("grade_level").filterable(),
    FieldSpec::text("status")
        .required()
        .filterable()
        .full_text_pushdown()
        .one_of(STUDENT_STATUSES),
    FieldSpec::new("enrollment_date", FieldType::Date)
        .sortable()
        .filterable(),
    FieldSpec::text("school_name").filterable(),
    FieldSpec::text("notes"),
    FieldSpec::new("created_at", FieldType::Integer)
        .required()
        .read_only()
        .sortable()
        .filterable(),
];

static CLASS_FIELDS: [FieldSpec; 13] = [
    FieldSpec::text("class_code").required().sortable().filterable(),
    FieldSpec::text("name").required().sortable().filterable(),
    FieldSpec::text("description"),
    FieldSpec::text("grade").sortable().filterable(),
    FieldSpec::text("course").filterable(),
    FieldSpec::text("subject").filterable(),
    FieldSpec::text("instructor_id").filterable(),
    FieldSpec::text("classroom_id").filterable(),
    FieldSpec::new("is_active", FieldType::Bool)
        .required()
        .filterable()
        .full_text_pushdown(),
    FieldSpec::new("start_date", FieldType::Date).filterable(),
    FieldSpec::new("end_date", FieldType::Date).filterable(),
    FieldSpec::text("color"),
    FieldSpec::new("created_at", FieldType::Integer)
        .required()
        .read_only()
        .sortable()
        .filterable(),
];

static STUDENT_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Student,
    table: "students",
    fts_table: "students_fts",
    fields: &STUDENT_FIELDS,
    search_columns: &[
        "name",
        "student_number",
        "phone",
        "parent_name",
        "parent_phone",
    ],
    identifier_field: "student_number",
    default_sort: "name",
    soft_delete: ("status", FieldInactive::Text("inactive")),
};

static CLASS_SCHEMA: EntitySchema = EntitySchema {
    kind: EntityKind::Class,
    table: "classes",
    fts_table: "classes_fts",
    fields: &CLASS_FIELDS,
    search_columns: &["name", "description", "subject", "course"],
    identifier_field: "class_code",
    default_sort: "name",
    soft_delete: ("is_active", FieldInactive::Bool(false)),
};

fn is_iso_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    let shaped = bytes.len() == 10
        && bytes.iter().enumerate().all(|(index, byte)| match index {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        });
    if !shaped {
        return false;
    }

    let (Ok(year), Ok(month), Ok(day)) = (
        value[0..4].parse::<u32>(),
        value[5..7].parse::<u32>(),
        value[8..10].parse::<u32>(),
    ) else {
        return false;
    };
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let days_in_month = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => return false,
    };
    (1..=days_in_month).contains(&day)
}
