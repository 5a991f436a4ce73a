//! Class use-case service.
//!
//! # Responsibility
//! - Search, read, create, update and soft-delete classes.
//! - Keep class names unique within a tenant.
//! - Refuse to deactivate a class that still has active enrollments.
//!
//! # Invariants
//! - Updates go through [`ConcurrencyGuard`]; the service never writes directly.
//! - Name uniqueness is pre-checked for a readable error and enforced by the
//!   store's `(tenant_id, name)` unique index.
//! - Soft delete sets `is_active = false` and keeps the row.

use crate::cancel::CallContext;
use crate::config::CoreConfig;
use crate::enrich::{Enriched, ResultEnricher};
use crate::model::entity::EntityKind;
use crate::model::patch::Patch;
use crate::model::query::{FilterValue, Page, Predicate, SearchQuery, SortOrder};
use crate::model::record::{FieldValue, Record, RecordId, TenantId, Version};
use crate::model::validation::ValidationError;
use crate::repo::{Keyset, RecordStore, Relation, ScanQuery};
use crate::search::{SearchCoordinator, SearchResult};
use crate::service::concurrency::ConcurrencyGuard;
use crate::service::identifier::{GeneratedIdentifier, IdentifierGenerator};
use crate::service::{create_record, ServiceError, ServiceResult};
use log::warn;
use std::collections::BTreeMap;

const KIND: EntityKind = EntityKind::Class;

/// Input for creating a class.
///
/// Blank strings are treated as absent. `class_code` is generated when not
/// supplied, and `is_active` defaults to `true`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewClass {
    pub class_code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub grade: Option<String>,
    pub course: Option<String>,
    pub subject: Option<String>,
    pub instructor_id: Option<String>,
    pub classroom_id: Option<String>,
    pub is_active: Option<bool>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub color: Option<String>,
}

impl NewClass {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn into_patch(self) -> Patch {
        let mut patch = Patch::new().set("name", self.name);
        for (field, value) in [
            ("class_code", self.class_code),
            ("description", self.description),
            ("grade", self.grade),
            ("course", self.course),
            ("subject", self.subject),
            ("instructor_id", self.instructor_id),
            ("classroom_id", self.classroom_id),
            ("start_date", self.start_date),
            ("end_date", self.end_date),
            ("color", self.color),
        ] {
            if let Some(value) = value {
                patch.insert(field, value);
            }
        }
        if let Some(is_active) = self.is_active {
            patch.insert("is_active", is_active);
        }
        patch
    }
}

/// Class service facade over a record store.
pub struct ClassService<S: RecordStore> {
    store: S,
    config: CoreConfig,
}

impl<S: RecordStore> ClassService<S> {
    pub fn new(store: S, config: CoreConfig) -> Self {
        Self { store, config }
    }

    /// Lists classes matching `query`, one page at a time.
    pub fn search(&self, query: &SearchQuery, ctx: &CallContext) -> SearchResult<Page> {
        SearchCoordinator::new(&self.store, &self.config.search).search(KIND, query, ctx)
    }

    /// Loads one class with its derived attributes.
    ///
    /// Attributes whose lookup failed are listed in [`Enriched::degraded`].
    pub fn get(
        &self,
        tenant_id: TenantId,
        id: RecordId,
        ctx: &CallContext,
    ) -> ServiceResult<Enriched> {
        ctx.check()?;
        let record = self
            .store
            .fetch(KIND, tenant_id, id)
            .map_err(|err| ServiceError::from_store(err, ctx))?
            .ok_or(ServiceError::NotFound { kind: KIND, id })?;

        Ok(ResultEnricher::for_kind(KIND).enrich_one(&self.store, tenant_id, record, ctx)?)
    }

    /// Creates a class after checking its name is free in the tenant.
    pub fn create(
        &self,
        tenant_id: TenantId,
        input: NewClass,
        ctx: &CallContext,
    ) -> ServiceResult<Record> {
        let patch = input.into_patch();
        if let Some(FieldValue::Text(name)) = patch.get("name") {
            self.ensure_name_available(tenant_id, name.trim(), None, ctx)?;
        }
        create_record(
            &self.store,
            &self.config.identifiers,
            KIND,
            tenant_id,
            &patch,
            &[("is_active", FieldValue::Bool(true))],
            ctx,
        )
    }

    /// Applies `patch`, guarded by `expected_version` when given.
    pub fn update(
        &self,
        tenant_id: TenantId,
        id: RecordId,
        patch: &Patch,
        expected_version: Option<Version>,
        ctx: &CallContext,
    ) -> ServiceResult<Record> {
        let changes = patch.normalize(KIND.schema())?;
        if let Some(FieldValue::Text(name)) = changes.get("name") {
            self.ensure_name_available(tenant_id, name, Some(id), ctx)?;
        }
        ConcurrencyGuard::new(&self.store).apply(KIND, tenant_id, id, changes, expected_version, ctx)
    }

    /// Deactivates a class with no active enrollments.
    pub fn soft_delete(
        &self,
        tenant_id: TenantId,
        id: RecordId,
        expected_version: Option<Version>,
        ctx: &CallContext,
    ) -> ServiceResult<Record> {
        ctx.check()?;
        let key = id.to_string();
        let counts = self
            .store
            .count_related(
                Relation::ActiveEnrollmentsPerClass,
                tenant_id,
                std::slice::from_ref(&key),
            )
            .map_err(|err| ServiceError::from_store(err, ctx))?;
        let dependents = counts.get(&key).copied().unwrap_or(0);
        if dependents > 0 {
            warn!(
                "event=record_delete module=service status=error kind={} id={id} reason=has_dependents dependents={dependents}",
                KIND.as_str()
            );
            return Err(ValidationError::HasDependents {
                kind: KIND,
                dependents,
            }
            .into());
        }

        let (field, inactive) = KIND.schema().soft_delete;
        let changes = BTreeMap::from([(field.to_string(), inactive.value())]);
        ConcurrencyGuard::new(&self.store).apply(KIND, tenant_id, id, changes, expected_version, ctx)
    }

    /// Allocates the next class code without creating a record.
    pub fn generate_identifier(&self, tenant_id: TenantId) -> GeneratedIdentifier {
        IdentifierGenerator::new(&self.store, &self.config.identifiers).generate(KIND, tenant_id)
    }

    fn ensure_name_available(
        &self,
        tenant_id: TenantId,
        name: &str,
        except: Option<RecordId>,
        ctx: &CallContext,
    ) -> ServiceResult<()> {
        if name.is_empty() {
            return Ok(());
        }
        ctx.check()?;

        let schema = KIND.schema();
        let predicates = [Predicate::parse(
            schema,
            "name",
            &FilterValue::Eq(FieldValue::from(name)),
        )?];
        let keyset = Keyset {
            field: "name",
            order: SortOrder::Asc,
            after: None,
        };
        let existing = self
            .store
            .scan(&ScanQuery {
                kind: KIND,
                tenant_id,
                predicates: &predicates,
                contains: &[],
                keyset: &keyset,
                fetch: 2,
            })
            .map_err(|err| ServiceError::from_store(err, ctx))?;

        if existing.iter().any(|record| Some(record.id) != except) {
            return Err(ValidationError::Duplicate {
                field: "name".to_string(),
                value: name.to_string(),
            }
            .into());
        }
        Ok(())
    }
}
