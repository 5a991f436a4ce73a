//! Use-case services for students and classes.
//!
//! # Responsibility
//! - Orchestrate search, creation, guarded updates and soft deletes.
//! - Map store failures onto the error taxonomy callers act on.
//!
//! # Invariants
//! - Only `Validation`, `NotFound` and `VersionConflict` describe caller
//!   mistakes; engine failures and identifier exhaustion are absorbed.
//! - Services never delete rows; deletion is a guarded status flip.

use crate::cancel::{CallContext, Interrupted};
use crate::config::IdentifierConfig;
use crate::model::entity::EntityKind;
use crate::model::patch::{normalize_value, Patch};
use crate::model::record::{now_millis, FieldValue, Record, RecordId, TenantId, Version};
use crate::model::validation::ValidationError;
use crate::repo::{RecordStore, StoreError};
use crate::search::SearchError;
use log::info;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod class_service;
pub mod concurrency;
pub mod identifier;
pub mod student_service;

pub use class_service::{ClassService, NewClass};
pub use concurrency::{ConcurrencyGuard, VersionConflict};
pub use identifier::{FallbackReason, GeneratedIdentifier, IdentifierGenerator, IdentifierSource};
pub use student_service::{NewStudent, StudentService};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced by service operations.
#[derive(Debug)]
pub enum ServiceError {
    Validation(ValidationError),
    NotFound { kind: EntityKind, id: RecordId },
    /// The record changed since the caller read it; nothing was written.
    VersionConflict(Box<VersionConflict>),
    Interrupted(Interrupted),
    Store(StoreError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{} not found: {id}", kind.as_str()),
            Self::VersionConflict(conflict) => write!(f, "{conflict}"),
            Self::Interrupted(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Interrupted(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::NotFound { .. } | Self::VersionConflict(_) => None,
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<Interrupted> for ServiceError {
    fn from(value: Interrupted) -> Self {
        Self::Interrupted(value)
    }
}

impl From<SearchError> for ServiceError {
    fn from(value: SearchError) -> Self {
        match value {
            SearchError::Validation(err) => Self::Validation(err),
            SearchError::Interrupted(err) => Self::Interrupted(err),
            SearchError::Store(err) => Self::Store(err),
        }
    }
}

impl ServiceError {
    /// Maps a store failure, resolving interrupts against `ctx`.
    pub(crate) fn from_store(err: StoreError, ctx: &CallContext) -> Self {
        match err {
            StoreError::Interrupted => Self::Interrupted(ctx.interrupt_reason()),
            other => Self::Store(other),
        }
    }

    /// Maps a failed insert or update. A uniqueness violation on a schema
    /// field becomes `Duplicate` carrying the value that was written.
    pub(crate) fn from_write(
        err: StoreError,
        kind: EntityKind,
        written: &BTreeMap<String, FieldValue>,
        ctx: &CallContext,
    ) -> Self {
        if let StoreError::UniqueViolation(message) = &err {
            if let Some(field) = violated_column(message).and_then(|name| kind.schema().field(name))
            {
                return Self::Validation(ValidationError::Duplicate {
                    field: field.name.to_string(),
                    value: written
                        .get(field.name)
                        .map(ToString::to_string)
                        .unwrap_or_default(),
                });
            }
        }
        Self::from_store(err, ctx)
    }
}

/// Last column of a `UNIQUE constraint failed: t.a, t.b` message.
fn violated_column(message: &str) -> Option<&str> {
    message.rsplit(", ").next()?.rsplit('.').next()
}

/// Inserts a new record built from `input` plus `defaults`.
///
/// The identifier field is generated when `input` leaves it unset; a
/// store-level uniqueness violation becomes `Duplicate`.
pub(crate) fn create_record(
    store: &dyn RecordStore,
    identifiers: &IdentifierConfig,
    kind: EntityKind,
    tenant_id: TenantId,
    input: &Patch,
    defaults: &[(&str, FieldValue)],
    ctx: &CallContext,
) -> ServiceResult<Record> {
    ctx.check()?;
    let schema = kind.schema();

    let mut fields = BTreeMap::new();
    for (name, value) in defaults {
        fields.insert((*name).to_string(), value.clone());
    }
    if !input.is_empty() {
        fields.extend(input.normalize(schema)?);
    }

    let identifier_missing = fields
        .get(schema.identifier_field)
        .map_or(true, FieldValue::is_null);
    if identifier_missing {
        let generated = IdentifierGenerator::new(store, identifiers).generate(kind, tenant_id);
        fields.insert(
            schema.identifier_field.to_string(),
            FieldValue::Text(generated.value),
        );
    }

    let now = now_millis();
    fields.insert("created_at".to_string(), FieldValue::Integer(now));
    for field in schema.fields {
        let value = fields.entry(field.name.to_string()).or_insert(FieldValue::Null);
        *value = normalize_value(field.field_type, value);
        field.check_value(value)?;
    }

    let record = Record {
        kind,
        id: Uuid::new_v4(),
        tenant_id,
        fields,
        derived: BTreeMap::new(),
        version: Version::from_millis(now),
    };

    ctx.check()?;
    store
        .insert(&record)
        .map_err(|err| ServiceError::from_write(err, kind, &record.fields, ctx))?;

    info!(
        "event=record_create module=service status=ok kind={} id={} version={}",
        kind.as_str(),
        record.id,
        record.version
    );
    Ok(record)
}
