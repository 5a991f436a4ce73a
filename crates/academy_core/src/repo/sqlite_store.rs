//! SQLite-backed [`RecordStore`].
//!
//! # Responsibility
//! - Translate store requests into parameterized SQL over the entity tables.
//! - Map SQLite failures onto [`StoreError`] variants callers can act on.
//!
//! # Invariants
//! - Only schema-declared column names are interpolated into SQL text.
//! - Keyset paging compares `(sort column, id)` as one row value; NULL sort
//!   keys take explicit branches.
//! - Conditional writes and sequence bumps run inside IMMEDIATE transactions.

use super::{
    ConditionalWrite, CountQuery, FullTextQuery, Keyset, Lookup, RecordStore, Relation,
    ScanQuery, StoreError, StoreResult, TextFilter,
};
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::entity::{EntityKind, EntitySchema, FieldType};
use crate::model::query::{FilterValue, Predicate, SortOrder};
use crate::model::record::{FieldValue, Record, RecordId, TenantId, Version};
use rusqlite::types::Value;
use rusqlite::{
    ffi, params, params_from_iter, Connection, ErrorCode, Row, Statement, Transaction,
    TransactionBehavior,
};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

const REQUIRED_TABLES: [&str; 5] = [
    "students",
    "classes",
    "instructors",
    "enrollments",
    "identifier_sequences",
];

/// SQLite implementation borrowing a migrated connection.
#[derive(Clone, Copy)]
pub struct SqliteRecordStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRecordStore<'conn> {
    /// Wraps a connection after checking it carries the expected schema.
    pub fn try_new(conn: &'conn Connection) -> StoreResult<Self> {
        ensure_store_connection_ready(conn)?;
        Ok(Self { conn })
    }

    fn query_records(
        &self,
        sql: &str,
        binds: Vec<Value>,
        schema: &EntitySchema,
        ranked: bool,
    ) -> StoreResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = parse_record(row, schema)?;
            if ranked {
                let rank: f64 = row.get("search_rank")?;
                record
                    .derived
                    .insert("search_rank".to_string(), FieldValue::Real(rank));
            }
            records.push(record);
        }
        Ok(records)
    }
}

impl RecordStore for SqliteRecordStore<'_> {
    fn fetch(
        &self,
        kind: EntityKind,
        tenant_id: TenantId,
        id: RecordId,
    ) -> StoreResult<Option<Record>> {
        let schema = kind.schema();
        let sql = format!(
            "SELECT {} FROM {} t WHERE t.tenant_id = ?1 AND t.id = ?2 LIMIT 1;",
            select_columns(schema, "t."),
            schema.table
        );
        let mut records = self.query_records(
            &sql,
            vec![
                Value::Text(tenant_id.to_string()),
                Value::Text(id.to_string()),
            ],
            schema,
            false,
        )?;
        Ok(records.pop())
    }

    fn scan(&self, query: &ScanQuery<'_>) -> StoreResult<Vec<Record>> {
        let schema = query.kind.schema();
        let mut conditions = Conditions::for_tenant(query.tenant_id);
        conditions.push_predicates(query.predicates);
        conditions.push_contains(schema, query.contains);
        conditions.push_keyset(query.keyset);

        let sql = format!(
            "SELECT {} FROM {} t WHERE {}{} LIMIT ?;",
            select_columns(schema, "t."),
            schema.table,
            conditions.sql,
            order_clause(query.keyset)
        );
        let mut binds = conditions.binds;
        binds.push(Value::Integer(i64::from(query.fetch)));
        self.query_records(&sql, binds, schema, false)
    }

    fn full_text(&self, query: &FullTextQuery<'_>) -> StoreResult<Vec<Record>> {
        let schema = query.kind.schema();
        let fts = schema.fts_table;
        let mut conditions = Conditions::for_tenant(query.tenant_id);
        conditions.push_predicates(query.predicates);
        conditions.push_keyset(query.keyset);

        let sql = format!(
            "SELECT {}, bm25({fts}) AS search_rank
             FROM {fts}
             JOIN {} t ON t.rowid = {fts}.rowid
             WHERE {fts} MATCH ? AND {}{} LIMIT ?;",
            select_columns(schema, "t."),
            schema.table,
            conditions.sql,
            order_clause(query.keyset)
        );
        let mut binds = vec![Value::Text(query.match_expression.to_string())];
        binds.extend(conditions.binds);
        binds.push(Value::Integer(i64::from(query.fetch)));
        self.query_records(&sql, binds, schema, true)
    }

    fn count(&self, query: &CountQuery<'_>) -> StoreResult<u64> {
        let schema = query.kind.schema();
        let fts = schema.fts_table;
        let mut conditions = Conditions::for_tenant(query.tenant_id);
        conditions.push_predicates(query.predicates);

        let mut binds = Vec::new();
        let sql = match query.text {
            Some(TextFilter::FullText(expression)) => {
                binds.push(Value::Text(expression.to_string()));
                format!(
                    "SELECT COUNT(*) FROM {fts}
                     JOIN {} t ON t.rowid = {fts}.rowid
                     WHERE {fts} MATCH ? AND {};",
                    schema.table, conditions.sql
                )
            }
            Some(TextFilter::Contains(terms)) => {
                conditions.push_contains(schema, terms);
                format!("SELECT COUNT(*) FROM {} t WHERE {};", schema.table, conditions.sql)
            }
            None => format!("SELECT COUNT(*) FROM {} t WHERE {};", schema.table, conditions.sql),
        };
        binds.extend(conditions.binds);

        let count: i64 = self
            .conn
            .query_row(&sql, params_from_iter(binds), |row| row.get(0))?;
        u64::try_from(count).map_err(|_| StoreError::InvalidData(format!("negative count {count}")))
    }

    fn insert(&self, record: &Record) -> StoreResult<()> {
        let schema = record.kind.schema();
        let mut columns = vec!["id", "tenant_id", "version"];
        let mut binds = vec![
            Value::Text(record.id.to_string()),
            Value::Text(record.tenant_id.to_string()),
            Value::Integer(record.version.as_millis()),
        ];
        for field in schema.fields {
            columns.push(field.name);
            binds.push(to_sql_value(record.field(field.name)));
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({});",
            schema.table,
            columns.join(", "),
            placeholders(columns.len())
        );
        self.conn.execute(&sql, params_from_iter(binds))?;
        Ok(())
    }

    fn compare_and_set(&self, write: &ConditionalWrite<'_>) -> StoreResult<Option<Record>> {
        let schema = write.kind.schema();
        let mut assignments = Vec::with_capacity(write.changes.len() + 1);
        let mut binds = Vec::with_capacity(write.changes.len() + 4);
        for (name, value) in write.changes {
            let field = schema
                .field(name)
                .filter(|field| field.writable)
                .ok_or_else(|| {
                    StoreError::InvalidData(format!(
                        "field `{name}` is not writable for {}",
                        write.kind.as_str()
                    ))
                })?;
            assignments.push(format!("{} = ?", field.name));
            binds.push(to_sql_value(value));
        }
        assignments.push("version = MAX(?, version + 1)".to_string());
        binds.push(Value::Integer(write.now_ms));
        binds.push(Value::Text(write.tenant_id.to_string()));
        binds.push(Value::Text(write.id.to_string()));

        let mut sql = format!(
            "UPDATE {} SET {} WHERE tenant_id = ? AND id = ?",
            schema.table,
            assignments.join(", ")
        );
        if let Some(expected) = write.expected_version {
            sql.push_str(" AND version = ?");
            binds.push(Value::Integer(expected.as_millis()));
        }
        sql.push_str(&format!(" RETURNING {};", select_columns(schema, "")));

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let updated = first_record(&mut tx.prepare(&sql)?, binds, schema)?;
        tx.commit()?;
        Ok(updated)
    }

    fn next_sequence(&self, tenant_id: TenantId, scope: &str) -> StoreResult<u64> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let value: i64 = tx.query_row(
            "INSERT INTO identifier_sequences (tenant_id, scope, last_value)
             VALUES (?1, ?2, 1)
             ON CONFLICT (tenant_id, scope) DO UPDATE SET last_value = last_value + 1
             RETURNING last_value;",
            params![tenant_id.to_string(), scope],
            |row| row.get(0),
        )?;
        tx.commit()?;
        u64::try_from(value)
            .map_err(|_| StoreError::InvalidData(format!("negative sequence value {value}")))
    }

    fn identifier_taken(
        &self,
        kind: EntityKind,
        tenant_id: TenantId,
        value: &str,
    ) -> StoreResult<bool> {
        let schema = kind.schema();
        let taken: i64 = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE tenant_id = ?1 AND {} = ?2);",
                schema.table, schema.identifier_field
            ),
            params![tenant_id.to_string(), value],
            |row| row.get(0),
        )?;
        Ok(taken != 0)
    }

    fn count_related(
        &self,
        relation: Relation,
        tenant_id: TenantId,
        keys: &[String],
    ) -> StoreResult<HashMap<String, i64>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let key_column = match relation {
            Relation::ActiveEnrollmentsPerClass => "class_id",
            Relation::ActiveEnrollmentsPerStudent => "student_id",
        };
        let sql = format!(
            "SELECT {key_column}, COUNT(*)
             FROM enrollments
             WHERE tenant_id = ? AND status = 'active' AND {key_column} IN ({})
             GROUP BY {key_column};",
            placeholders(keys.len())
        );
        let binds = tenant_and_keys(tenant_id, keys);

        let mut stmt = self.conn.prepare(&sql)?;
        let counts = stmt
            .query_map(params_from_iter(binds), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(counts)
    }

    fn resolve_labels(
        &self,
        lookup: Lookup,
        tenant_id: TenantId,
        keys: &[String],
    ) -> StoreResult<HashMap<String, String>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = match lookup {
            Lookup::InstructorName => format!(
                "SELECT id, name
                 FROM instructors
                 WHERE tenant_id = ? AND status = 'active' AND id IN ({});",
                placeholders(keys.len())
            ),
        };
        let binds = tenant_and_keys(tenant_id, keys);

        let mut stmt = self.conn.prepare(&sql)?;
        let labels = stmt
            .query_map(params_from_iter(binds), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(labels)
    }
}

/// Accumulates `AND`-joined conditions with their bound values.
struct Conditions {
    sql: String,
    binds: Vec<Value>,
}

impl Conditions {
    fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            sql: "t.tenant_id = ?".to_string(),
            binds: vec![Value::Text(tenant_id.to_string())],
        }
    }

    fn push(&mut self, clause: &str) {
        self.sql.push_str(" AND ");
        self.sql.push_str(clause);
    }

    fn push_predicates(&mut self, predicates: &[Predicate]) {
        for predicate in predicates {
            let column = format!("t.{}", predicate.field.name);
            match &predicate.filter {
                FilterValue::Eq(FieldValue::Null) => self.push(&format!("{column} IS NULL")),
                FilterValue::Eq(value) => {
                    self.push(&format!("{column} = ?"));
                    self.binds.push(to_sql_value(value));
                }
                FilterValue::AnyOf(values) => {
                    self.push(&format!("{column} IN ({})", placeholders(values.len())));
                    self.binds.extend(values.iter().map(to_sql_value));
                }
                FilterValue::Range { min, max } => {
                    if let Some(min) = min.as_ref().filter(|value| !value.is_null()) {
                        self.push(&format!("{column} >= ?"));
                        self.binds.push(to_sql_value(min));
                    }
                    if let Some(max) = max.as_ref().filter(|value| !value.is_null()) {
                        self.push(&format!("{column} <= ?"));
                        self.binds.push(to_sql_value(max));
                    }
                }
            }
        }
    }

    /// Every term must start a word in at least one search column. Words
    /// begin the column or follow a space or hyphen, close to the FTS5
    /// tokenizer's prefix matches.
    fn push_contains(&mut self, schema: &EntitySchema, terms: &[String]) {
        for term in terms {
            let patterns = word_prefix_patterns(term);
            let any_column = schema
                .search_columns
                .iter()
                .flat_map(|column| {
                    patterns
                        .iter()
                        .map(move |_| format!("t.{column} LIKE ? ESCAPE '\\'"))
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            self.push(&format!("({any_column})"));
            for _ in schema.search_columns {
                self.binds.extend(patterns.iter().cloned().map(Value::Text));
            }
        }
    }

    /// NULL sorts before every value, as in `ORDER BY` and
    /// [`FieldValue::sort_cmp`]. A row-value comparison against NULL is
    /// itself NULL, so null keys and null columns get explicit branches.
    fn push_keyset(&mut self, keyset: &Keyset) {
        let Some((value, id)) = &keyset.after else {
            return;
        };
        let column = format!("t.{}", keyset.field);
        let clause = match (keyset.order, value.is_null()) {
            (SortOrder::Asc, true) => {
                format!("(({column} IS NULL AND t.id > ?) OR {column} IS NOT NULL)")
            }
            (SortOrder::Asc, false) => format!("({column}, t.id) > (?, ?)"),
            (SortOrder::Desc, true) => format!("({column} IS NULL AND t.id < ?)"),
            (SortOrder::Desc, false) => {
                format!("(({column}, t.id) < (?, ?) OR {column} IS NULL)")
            }
        };
        self.push(&clause);
        if !value.is_null() {
            self.binds.push(to_sql_value(value));
        }
        self.binds.push(Value::Text(id.to_string()));
    }
}

fn order_clause(keyset: &Keyset) -> String {
    let direction = match keyset.order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    format!(" ORDER BY t.{} {direction}, t.id {direction}", keyset.field)
}

fn select_columns(schema: &EntitySchema, prefix: &str) -> String {
    ["id", "tenant_id", "version"]
        .into_iter()
        .chain(schema.fields.iter().map(|field| field.name))
        .map(|column| format!("{prefix}{column} AS {column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn tenant_and_keys(tenant_id: TenantId, keys: &[String]) -> Vec<Value> {
    std::iter::once(Value::Text(tenant_id.to_string()))
        .chain(keys.iter().cloned().map(Value::Text))
        .collect()
}

/// LIKE patterns matching `term` at the start of a word, wildcards escaped.
fn word_prefix_patterns(term: &str) -> [String; 3] {
    let mut escaped = String::with_capacity(term.len() + 1);
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    [
        escaped.clone(),
        format!("% {escaped}"),
        format!("%-{escaped}"),
    ]
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Bool(value) => Value::Integer(i64::from(*value)),
        FieldValue::Integer(value) => Value::Integer(*value),
        FieldValue::Real(value) => Value::Real(*value),
        FieldValue::Text(value) => Value::Text(value.clone()),
    }
}

fn first_record(
    stmt: &mut Statement<'_>,
    binds: Vec<Value>,
    schema: &EntitySchema,
) -> StoreResult<Option<Record>> {
    let mut rows = stmt.query(params_from_iter(binds))?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let record = parse_record(row, schema)?;
    Ok(Some(record))
}

fn parse_record(row: &Row<'_>, schema: &EntitySchema) -> StoreResult<Record> {
    let id_text: String = row.get("id")?;
    let tenant_text: String = row.get("tenant_id")?;
    let version: i64 = row.get("version")?;

    let mut fields = BTreeMap::new();
    for field in schema.fields {
        let value = match field.field_type {
            FieldType::Text | FieldType::Date => {
                FieldValue::from(row.get::<_, Option<String>>(field.name)?)
            }
            FieldType::Integer => FieldValue::from(row.get::<_, Option<i64>>(field.name)?),
            FieldType::Bool => match row.get::<_, Option<i64>>(field.name)? {
                None => FieldValue::Null,
                Some(0) => FieldValue::Bool(false),
                Some(1) => FieldValue::Bool(true),
                Some(other) => {
                    return Err(StoreError::InvalidData(format!(
                        "invalid bool `{other}` in {}.{}",
                        schema.table, field.name
                    )))
                }
            },
        };
        fields.insert(field.name.to_string(), value);
    }

    Ok(Record {
        kind: schema.kind,
        id: parse_uuid(&id_text, "id")?,
        tenant_id: parse_uuid(&tenant_text, "tenant_id")?,
        fields,
        derived: BTreeMap::new(),
        version: Version::from_millis(version),
    })
}

fn parse_uuid(value: &str, column: &'static str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn classify_sqlite_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == ErrorCode::OperationInterrupted {
            return StoreError::Interrupted;
        }
        if failure.code == ErrorCode::ConstraintViolation
            && matches!(
                failure.extended_code,
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            )
        {
            return StoreError::UniqueViolation(
                message.clone().unwrap_or_else(|| failure.to_string()),
            );
        }
    }
    StoreError::Db(DbError::Sqlite(err))
}

fn ensure_store_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(StoreError::NotReady {
            expected_version,
            actual_version,
        });
    }

    for table in REQUIRED_TABLES {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1);",
            [table],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::MissingRequiredTable(table));
        }
    }
    Ok(())
}
