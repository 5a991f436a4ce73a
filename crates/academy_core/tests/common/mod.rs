#![allow(dead_code)]

use academy_core::db::open_db_in_memory;
use academy_core::repo::{
    ConditionalWrite, CountQuery, FullTextQuery, Lookup, Relation, ScanQuery,
};
use academy_core::{
    CallContext, ClassService, CoreConfig, EntityKind, NewClass, NewStudent, Record, RecordId,
    RecordStore, SqliteRecordStore, StoreError, StoreResult, StudentService, TenantId,
};
use rusqlite::{params, Connection};
use std::cell::Cell;
use std::collections::HashMap;
use uuid::Uuid;

pub fn setup() -> Connection {
    open_db_in_memory().unwrap()
}

pub fn ctx() -> CallContext {
    CallContext::background()
}

pub fn store(conn: &Connection) -> SqliteRecordStore<'_> {
    SqliteRecordStore::try_new(conn).unwrap()
}

pub fn students(conn: &Connection) -> StudentService<SqliteRecordStore<'_>> {
    StudentService::new(store(conn), CoreConfig::default())
}

pub fn classes(conn: &Connection) -> ClassService<SqliteRecordStore<'_>> {
    ClassService::new(store(conn), CoreConfig::default())
}

pub fn create_student<S: RecordStore>(
    service: &StudentService<S>,
    tenant_id: TenantId,
    name: &str,
) -> Record {
    service
        .create(tenant_id, NewStudent::named(name), &ctx())
        .unwrap()
}

pub fn create_class<S: RecordStore>(
    service: &ClassService<S>,
    tenant_id: TenantId,
    name: &str,
    instructor_id: Option<&str>,
) -> Record {
    let mut input = NewClass::named(name);
    input.instructor_id = instructor_id.map(str::to_string);
    service.create(tenant_id, input, &ctx()).unwrap()
}

pub fn insert_instructor(conn: &Connection, tenant_id: TenantId, name: &str, status: &str) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO instructors (id, tenant_id, name, status) VALUES (?1, ?2, ?3, ?4);",
        params![id, tenant_id.to_string(), name, status],
    )
    .unwrap();
    id
}

pub fn enroll(
    conn: &Connection,
    tenant_id: TenantId,
    student_id: RecordId,
    class_id: RecordId,
    status: &str,
) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO enrollments (id, tenant_id, student_id, class_id, status)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            id,
            tenant_id.to_string(),
            student_id.to_string(),
            class_id.to_string(),
            status
        ],
    )
    .unwrap();
    id
}

pub fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|record| record.text("name").unwrap().to_string())
        .collect()
}

/// Faults injected into a [`FlakyStore`].
#[derive(Default)]
pub struct Faults {
    pub full_text: Cell<bool>,
    pub interrupt_full_text: Cell<bool>,
    pub count: Cell<bool>,
    pub count_related: Cell<bool>,
    pub interrupt_count_related: Cell<bool>,
    pub resolve_labels: Cell<bool>,
    /// Fail every n-th sequence call; 0 never fails.
    pub next_sequence_every: Cell<usize>,
    /// Report every identifier as already taken.
    pub all_identifiers_taken: Cell<bool>,
    /// Scans see no rows, as if read before a concurrent insert.
    pub stale_scan: Cell<bool>,
}

/// Call counters kept by a [`FlakyStore`].
#[derive(Default)]
pub struct Calls {
    pub full_text: Cell<usize>,
    pub scan: Cell<usize>,
    pub count: Cell<usize>,
    pub count_related: Cell<usize>,
    pub resolve_labels: Cell<usize>,
    pub next_sequence: Cell<usize>,
    pub identifier_taken: Cell<usize>,
}

fn bump(counter: &Cell<usize>) -> usize {
    let next = counter.get() + 1;
    counter.set(next);
    next
}

fn injected(operation: &str) -> StoreError {
    StoreError::InvalidData(format!("injected {operation} failure"))
}

/// Store wrapper that counts calls and fails selected operations.
pub struct FlakyStore<'a, S> {
    pub inner: S,
    pub faults: &'a Faults,
    pub calls: &'a Calls,
}

impl<'a, S> FlakyStore<'a, S> {
    pub fn new(inner: S, faults: &'a Faults, calls: &'a Calls) -> Self {
        Self {
            inner,
            faults,
            calls,
        }
    }
}

impl<S: RecordStore> RecordStore for FlakyStore<'_, S> {
    fn fetch(
        &self,
        kind: EntityKind,
        tenant_id: TenantId,
        id: RecordId,
    ) -> StoreResult<Option<Record>> {
        self.inner.fetch(kind, tenant_id, id)
    }

    fn scan(&self, query: &ScanQuery<'_>) -> StoreResult<Vec<Record>> {
        bump(&self.calls.scan);
        if self.faults.stale_scan.get() {
            return Ok(Vec::new());
        }
        self.inner.scan(query)
    }

    fn full_text(&self, query: &FullTextQuery<'_>) -> StoreResult<Vec<Record>> {
        bump(&self.calls.full_text);
        if self.faults.interrupt_full_text.get() {
            return Err(StoreError::Interrupted);
        }
        if self.faults.full_text.get() {
            return Err(injected("full_text"));
        }
        self.inner.full_text(query)
    }

    fn count(&self, query: &CountQuery<'_>) -> StoreResult<u64> {
        bump(&self.calls.count);
        if self.faults.count.get() {
            return Err(injected("count"));
        }
        self.inner.count(query)
    }

    fn insert(&self, record: &Record) -> StoreResult<()> {
        self.inner.insert(record)
    }

    fn compare_and_set(&self, write: &ConditionalWrite<'_>) -> StoreResult<Option<Record>> {
        self.inner.compare_and_set(write)
    }

    fn next_sequence(&self, tenant_id: TenantId, scope: &str) -> StoreResult<u64> {
        let call = bump(&self.calls.next_sequence);
        let every = self.faults.next_sequence_every.get();
        if every > 0 && call % every == 0 {
            return Err(injected("next_sequence"));
        }
        self.inner.next_sequence(tenant_id, scope)
    }

    fn identifier_taken(
        &self,
        kind: EntityKind,
        tenant_id: TenantId,
        value: &str,
    ) -> StoreResult<bool> {
        bump(&self.calls.identifier_taken);
        if self.faults.all_identifiers_taken.get() {
            return Ok(true);
        }
        self.inner.identifier_taken(kind, tenant_id, value)
    }

    fn count_related(
        &self,
        relation: Relation,
        tenant_id: TenantId,
        keys: &[String],
    ) -> StoreResult<HashMap<String, i64>> {
        bump(&self.calls.count_related);
        if self.faults.interrupt_count_related.get() {
            return Err(StoreError::Interrupted);
        }
        if self.faults.count_related.get() {
            return Err(injected("count_related"));
        }
        self.inner.count_related(relation, tenant_id, keys)
    }

    fn resolve_labels(
        &self,
        lookup: Lookup,
        tenant_id: TenantId,
        keys: &[String],
    ) -> StoreResult<HashMap<String, String>> {
        bump(&self.calls.resolve_labels);
        if self.faults.resolve_labels.get() {
            return Err(injected("resolve_labels"));
        }
        self.inner.resolve_labels(lookup, tenant_id, keys)
    }
}
