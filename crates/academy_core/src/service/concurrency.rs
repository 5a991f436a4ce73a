//! Optimistic-concurrency updates.
//!
//! # Responsibility
//! - Apply a patch to one record with a single atomic compare-and-set.
//! - Classify a missed write as `NotFound` or `VersionConflict`.
//!
//! # Invariants
//! - A conflicting update writes nothing.
//! - A successful update stamps a version strictly greater than the previous one.
//! - No automatic retry; the caller decides after a conflict.

use crate::cancel::CallContext;
use crate::model::entity::EntityKind;
use crate::model::patch::Patch;
use crate::model::record::{now_millis, FieldValue, Record, RecordId, TenantId, Version};
use crate::repo::{ConditionalWrite, RecordStore, StoreError};
use crate::service::{ServiceError, ServiceResult};
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Rejected update, with everything needed to merge or reload.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionConflict {
    /// Normalized changes the caller tried to apply.
    pub attempted_update: BTreeMap<String, FieldValue>,
    /// Authoritative record as currently stored.
    pub current_record: Record,
    pub current_version: Version,
    pub expected_version: Version,
}

impl Display for VersionConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} changed: expected version {}, current version {}",
            self.current_record.kind.as_str(),
            self.current_record.id,
            self.expected_version,
            self.current_version
        )
    }
}

/// Guards writes to one store with version checks.
pub struct ConcurrencyGuard<'a> {
    store: &'a dyn RecordStore,
}

impl<'a> ConcurrencyGuard<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Validates `patch` and applies it.
    ///
    /// With `expected_version` the write only lands when the stored version
    /// still matches; without it the update is unconditional.
    pub fn update(
        &self,
        kind: EntityKind,
        tenant_id: TenantId,
        id: RecordId,
        patch: &Patch,
        expected_version: Option<Version>,
        ctx: &CallContext,
    ) -> ServiceResult<Record> {
        let changes = patch.normalize(kind.schema())?;
        self.apply(kind, tenant_id, id, changes, expected_version, ctx)
    }

    /// Applies already validated changes.
    pub(crate) fn apply(
        &self,
        kind: EntityKind,
        tenant_id: TenantId,
        id: RecordId,
        changes: BTreeMap<String, FieldValue>,
        expected_version: Option<Version>,
        ctx: &CallContext,
    ) -> ServiceResult<Record> {
        ctx.check()?;
        let written = self
            .store
            .compare_and_set(&ConditionalWrite {
                kind,
                tenant_id,
                id,
                changes: &changes,
                expected_version,
                now_ms: now_millis(),
            })
            .map_err(|err| ServiceError::from_write(err, kind, &changes, ctx))?;

        if let Some(record) = written {
            info!(
                "event=record_update module=service status=ok kind={} id={id} fields={} version={}",
                kind.as_str(),
                changes.len(),
                record.version
            );
            return Ok(record);
        }

        ctx.check()?;
        let current = self
            .store
            .fetch(kind, tenant_id, id)
            .map_err(|err| ServiceError::from_store(err, ctx))?;
        let Some(current) = current else {
            return Err(ServiceError::NotFound { kind, id });
        };
        let Some(expected_version) = expected_version else {
            return Err(ServiceError::Store(StoreError::InvalidData(format!(
                "unconditional update of {} {id} matched no row",
                kind.as_str()
            ))));
        };

        warn!(
            "event=version_conflict module=service status=error kind={} id={id} expected_version={expected_version} current_version={}",
            kind.as_str(),
            current.version
        );
        Err(ServiceError::VersionConflict(Box::new(VersionConflict {
            attempted_update: changes,
            current_version: current.version,
            current_record: current,
            expected_version,
        })))
    }
}
