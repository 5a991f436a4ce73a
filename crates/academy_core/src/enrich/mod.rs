//! Batched secondary attributes for result pages.
//!
//! # Responsibility
//! - Attach derived attributes (counts, labels) to an already fetched page.
//! - Issue one store call per attribute per page, never one per record.
//!
//! # Invariants
//! - Record order and stored fields are never changed.
//! - A failed lookup leaves the attribute at its default and is reported as
//!   degraded; it never fails the page.
//! - An interrupted call aborts the whole enrichment.

use crate::cancel::{CallContext, Interrupted};
use crate::model::entity::EntityKind;
use crate::model::record::{FieldValue, Record, TenantId};
use crate::repo::{Lookup, RecordStore, Relation, StoreError, StoreResult};
use log::warn;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Extracts the grouping key of one record, if it has one.
pub type KeyFn = fn(&Record) -> Option<String>;

/// Loads values for a batch of distinct keys in one store call.
pub type LoadFn =
    fn(&dyn RecordStore, TenantId, &[String]) -> StoreResult<HashMap<String, FieldValue>>;

/// One derived attribute: key extractor, batch loader and default value.
pub struct Enrichment {
    pub attribute: &'static str,
    pub key: KeyFn,
    pub load: LoadFn,
    pub default: FieldValue,
}

static STUDENT_ENRICHMENTS: [Enrichment; 1] = [Enrichment {
    attribute: "enrollment_count",
    key: record_id_key,
    load: load_student_enrollments,
    default: FieldValue::Integer(0),
}];

static CLASS_ENRICHMENTS: [Enrichment; 2] = [
    Enrichment {
        attribute: "student_count",
        key: record_id_key,
        load: load_class_enrollments,
        default: FieldValue::Integer(0),
    },
    Enrichment {
        attribute: "instructor_name",
        key: instructor_key,
        load: load_instructor_names,
        default: FieldValue::Null,
    },
];

/// One record read on its own, with the attributes that fell back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enriched {
    pub record: Record,
    pub degraded: Vec<String>,
}

impl Enriched {
    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty()
    }
}

/// Applies a registry of enrichments to pages.
pub struct ResultEnricher<'a> {
    enrichments: &'a [Enrichment],
}

impl ResultEnricher<'static> {
    /// Registry used by search and point reads of `kind`.
    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Student => Self::new(&STUDENT_ENRICHMENTS),
            EntityKind::Class => Self::new(&CLASS_ENRICHMENTS),
        }
    }
}

impl<'a> ResultEnricher<'a> {
    pub fn new(enrichments: &'a [Enrichment]) -> Self {
        Self { enrichments }
    }

    pub fn attributes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.enrichments.iter().map(|enrichment| enrichment.attribute)
    }

    /// Attaches every registered attribute to `records` in place.
    ///
    /// Returns the attributes that fell back to their defaults.
    pub fn enrich(
        &self,
        store: &dyn RecordStore,
        tenant_id: TenantId,
        records: &mut [Record],
        ctx: &CallContext,
    ) -> Result<Vec<String>, Interrupted> {
        let mut degraded = Vec::new();
        if records.is_empty() {
            return Ok(degraded);
        }

        for enrichment in self.enrichments {
            ctx.check()?;

            let keys = records
                .iter()
                .filter_map(|record| (enrichment.key)(record))
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect::<Vec<_>>();
            let loaded = if keys.is_empty() {
                Ok(HashMap::new())
            } else {
                (enrichment.load)(store, tenant_id, &keys)
            };

            let values = match loaded {
                Ok(values) => values,
                Err(StoreError::Interrupted) => return Err(ctx.interrupt_reason()),
                Err(err) => {
                    warn!(
                        "event=enrichment_degraded module=enrich status=degraded attribute={} records={} keys={} error={err}",
                        enrichment.attribute,
                        records.len(),
                        keys.len()
                    );
                    degraded.push(enrichment.attribute.to_string());
                    HashMap::new()
                }
            };

            for record in records.iter_mut() {
                let value = (enrichment.key)(record)
                    .and_then(|key| values.get(&key).cloned())
                    .unwrap_or_else(|| enrichment.default.clone());
                record
                    .derived
                    .insert(enrichment.attribute.to_string(), value);
            }
        }

        Ok(degraded)
    }

    /// Enriches a single record, as a page of one.
    pub fn enrich_one(
        &self,
        store: &dyn RecordStore,
        tenant_id: TenantId,
        record: Record,
        ctx: &CallContext,
    ) -> Result<Enriched, Interrupted> {
        let mut records = [record];
        let degraded = self.enrich(store, tenant_id, &mut records, ctx)?;
        let [record] = records;
        Ok(Enriched { record, degraded })
    }
}

fn record_id_key(record: &Record) -> Option<String> {
    Some(record.id.to_string())
}

fn instructor_key(record: &Record) -> Option<String> {
    record.text("instructor_id").map(str::to_string)
}

fn load_counts(
    store: &dyn RecordStore,
    relation: Relation,
    tenant_id: TenantId,
    keys: &[String],
) -> StoreResult<HashMap<String, FieldValue>> {
    let counts = store.count_related(relation, tenant_id, keys)?;
    Ok(counts
        .into_iter()
        .map(|(key, count)| (key, FieldValue::Integer(count)))
        .collect())
}

fn load_student_enrollments(
    store: &dyn RecordStore,
    tenant_id: TenantId,
    keys: &[String],
) -> StoreResult<HashMap<String, FieldValue>> {
    load_counts(store, Relation::ActiveEnrollmentsPerStudent, tenant_id, keys)
}

fn load_class_enrollments(
    store: &dyn RecordStore,
    tenant_id: TenantId,
    keys: &[String],
) -> StoreResult<HashMap<String, FieldValue>> {
    load_counts(store, Relation::ActiveEnrollmentsPerClass, tenant_id, keys)
}

fn load_instructor_names(
    store: &dyn RecordStore,
    tenant_id: TenantId,
    keys: &[String],
) -> StoreResult<HashMap<String, FieldValue>> {
    let labels = store.resolve_labels(Lookup::InstructorName, tenant_id, keys)?;
    Ok(labels
        .into_iter()
        .map(|(key, name)| (key, FieldValue::Text(name)))
        .collect())
}
