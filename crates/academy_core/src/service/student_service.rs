//! Student use-case service.
//!
//! # Responsibility
//! - Search, read, create, update and soft-delete students.
//! - Assign student numbers through the identifier generator.
//!
//! # Invariants
//! - Updates go through [`ConcurrencyGuard`]; the service never writes directly.
//! - Soft delete sets `status = inactive` and keeps the row.

use crate::cancel::CallContext;
use crate::config::CoreConfig;
use crate::enrich::{Enriched, ResultEnricher};
use crate::model::entity::EntityKind;
use crate::model::patch::Patch;
use crate::model::query::{Page, SearchQuery};
use crate::model::record::{FieldValue, Record, RecordId, TenantId, Version};
use crate::repo::RecordStore;
use crate::search::{SearchCoordinator, SearchResult};
use crate::service::concurrency::ConcurrencyGuard;
use crate::service::identifier::{GeneratedIdentifier, IdentifierGenerator};
use crate::service::{create_record, ServiceError, ServiceResult};
use std::collections::BTreeMap;

const KIND: EntityKind = EntityKind::Student;

/// Input for creating a student.
///
/// Blank strings are treated as absent. `student_number` is generated when
/// not supplied, and `status` defaults to `active`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewStudent {
    pub student_number: Option<String>,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub parent_name: Option<String>,
    pub parent_phone: Option<String>,
    pub grade_level: Option<String>,
    pub status: Option<String>,
    /// ISO `YYYY-MM-DD`.
    pub enrollment_date: Option<String>,
    pub school_name: Option<String>,
    pub notes: Option<String>,
}

impl NewStudent {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn into_patch(self) -> Patch {
        let mut patch = Patch::new().set("name", self.name);
        for (field, value) in [
            ("student_number", self.student_number),
            ("phone", self.phone),
            ("email", self.email),
            ("parent_name", self.parent_name),
            ("parent_phone", self.parent_phone),
            ("grade_level", self.grade_level),
            ("status", self.status),
            ("enrollment_date", self.enrollment_date),
            ("school_name", self.school_name),
            ("notes", self.notes),
        ] {
            if let Some(value) = value {
                patch.insert(field, value);
            }
        }
        patch
    }
}

/// Student service facade over a record store.
pub struct StudentService<S: RecordStore> {
    store: S,
    config: CoreConfig,
}

impl<S: RecordStore> StudentService<S> {
    pub fn new(store: S, config: CoreConfig) -> Self {
        Self { store, config }
    }

    /// Lists students matching `query`, one page at a time.
    pub fn search(&self, query: &SearchQuery, ctx: &CallContext) -> SearchResult<Page> {
        SearchCoordinator::new(&self.store, &self.config.search).search(KIND, query, ctx)
    }

    /// Loads one student with its derived attributes.
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

    pub fn create(
        &self,
        tenant_id: TenantId,
        input: NewStudent,
        ctx: &CallContext,
    ) -> ServiceResult<Record> {
        create_record(
            &self.store,
            &self.config.identifiers,
            KIND,
            tenant_id,
            &input.into_patch(),
            &[("status", FieldValue::from("active"))],
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
        ConcurrencyGuard::new(&self.store).update(KIND, tenant_id, id, patch, expected_version, ctx)
    }

    /// Marks a student inactive.
    pub fn soft_delete(
        &self,
        tenant_id: TenantId,
        id: RecordId,
        expected_version: Option<Version>,
        ctx: &CallContext,
    ) -> ServiceResult<Record> {
        let (field, inactive) = KIND.schema().soft_delete;
        let changes = BTreeMap::from([(field.to_string(), inactive.value())]);
        ConcurrencyGuard::new(&self.store).apply(KIND, tenant_id, id, changes, expected_version, ctx)
    }

    /// Allocates the next student number without creating a record.
    pub fn generate_identifier(&self, tenant_id: TenantId) -> GeneratedIdentifier {
        IdentifierGenerator::new(&self.store, &self.config.identifiers).generate(KIND, tenant_id)
    }
}
