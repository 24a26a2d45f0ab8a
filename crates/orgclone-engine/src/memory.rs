//! In-memory store for deterministic testing.
//!
//! Implements both [`SourceSnapshotReader`] and [`TargetWriter`] over plain
//! JSON rows, with optional unique constraints, foreign-key checks,
//! required fields, injected failures and insert latency. Organization ids
//! are stored in rows as their string form.
//!
//! ## Usage
//!
//! ```rust
//! use orgclone_engine::memory::InMemoryStore;
//! use serde_json::json;
//! use uuid::Uuid;
//!
//! let org = Uuid::new_v4();
//! let store = InMemoryStore::new()
//!     .with_organization(org)
//!     .with_row("faq", json!({"id": 1, "organization_id": org.to_string()}))
//!     .with_unique("faq", &["organization_id", "slug"]);
//!
//! assert_eq!(store.rows("faq").len(), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use orgclone_core::{
    InsertError, RecordId, Result, Row, ScopeFilter, SourceSnapshotReader, TargetWriter,
};

/// First id minted for inserted rows. Seed rows should stay below it.
pub const FIRST_MINTED_ID: i64 = 10_000;

#[derive(Debug, Clone)]
struct ForeignKeyCheck {
    table: String,
    field: String,
    target_table: String,
}

#[derive(Debug, Clone)]
struct FailureRule {
    table: String,
    field: String,
    value: JsonValue,
    error: InsertError,
}

#[derive(Debug, Clone, Default)]
struct StoreConfig {
    unique: Vec<(String, Vec<String>)>,
    foreign_keys: Vec<ForeignKeyCheck>,
    required: Vec<(String, String)>,
    failures: Vec<FailureRule>,
    insert_delay: Option<Duration>,
}

#[derive(Debug)]
struct StoreState {
    organizations: HashSet<Uuid>,
    tables: HashMap<String, Vec<Row>>,
    next_id: i64,
    inserts: usize,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            organizations: HashSet::new(),
            tables: HashMap::new(),
            next_id: FIRST_MINTED_ID,
            inserts: 0,
        }
    }
}

/// Shared in-memory tables. Cloning the store shares its state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    config: Arc<StoreConfig>,
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organization(self, org: Uuid) -> Self {
        self.lock().organizations.insert(org);
        self
    }

    /// Seed a row. Non-object values are ignored.
    pub fn with_row(self, table: &str, row: JsonValue) -> Self {
        match row {
            JsonValue::Object(map) => {
                self.lock()
                    .tables
                    .entry(table.to_string())
                    .or_default()
                    .push(map);
            }
            other => warn!(table, value = %other, "Ignoring non-object seed row"),
        }
        self
    }

    /// Reject inserts whose values for `fields` match an existing row.
    pub fn with_unique(mut self, table: &str, fields: &[&str]) -> Self {
        Arc::make_mut(&mut self.config).unique.push((
            table.to_string(),
            fields.iter().map(|f| f.to_string()).collect(),
        ));
        self
    }

    /// Reject inserts whose non-null `field` matches no `id` in `target_table`.
    pub fn with_foreign_key(mut self, table: &str, field: &str, target_table: &str) -> Self {
        Arc::make_mut(&mut self.config)
            .foreign_keys
            .push(ForeignKeyCheck {
                table: table.to_string(),
                field: field.to_string(),
                target_table: target_table.to_string(),
            });
        self
    }

    /// Reject inserts where `field` is missing or null.
    pub fn with_required(mut self, table: &str, field: &str) -> Self {
        Arc::make_mut(&mut self.config)
            .required
            .push((table.to_string(), field.to_string()));
        self
    }

    /// Fail inserts into `table` whose `field` equals `value`.
    pub fn fail_insert_when(
        mut self,
        table: &str,
        field: &str,
        value: JsonValue,
        error: InsertError,
    ) -> Self {
        Arc::make_mut(&mut self.config).failures.push(FailureRule {
            table: table.to_string(),
            field: field.to_string(),
            value,
            error,
        });
        self
    }

    /// Sleep before every insert.
    pub fn with_insert_delay(mut self, delay: Duration) -> Self {
        Arc::make_mut(&mut self.config).insert_delay = Some(delay);
        self
    }

    /// Register an organization after construction (callers creating the
    /// target tenant).
    pub fn create_organization(&self, org: Uuid) {
        self.lock().organizations.insert(org);
    }

    /// All rows currently in `table`.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    /// Rows of `table` whose `tenant_field` holds `org`.
    pub fn rows_for_org(&self, table: &str, tenant_field: &str, org: Uuid) -> Vec<Row> {
        let org = org.to_string();
        self.rows(table)
            .into_iter()
            .filter(|row| row.get(tenant_field).and_then(JsonValue::as_str) == Some(org.as_str()))
            .collect()
    }

    /// Find a row by its `id` column.
    pub fn find(&self, table: &str, id: &RecordId) -> Option<Row> {
        self.rows(table)
            .into_iter()
            .find(|row| row.get("id").and_then(RecordId::from_json).as_ref() == Some(id))
    }

    /// Number of successful inserts so far.
    pub fn insert_count(&self) -> usize {
        self.lock().inserts
    }

    /// Total rows across all tables.
    pub fn total_rows(&self) -> usize {
        self.lock().tables.values().map(Vec::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panicking test thread must not hide the state from later asserts.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, state: &StoreState, table: &str, row: &Row) -> std::result::Result<(), InsertError> {
        for rule in self.config.failures.iter().filter(|r| r.table == table) {
            if row.get(&rule.field) == Some(&rule.value) {
                return Err(rule.error.clone());
            }
        }

        for (t, field) in &self.config.required {
            if t == table && row.get(field).map_or(true, JsonValue::is_null) {
                return Err(InsertError::validation(format!(
                    "null value in column \"{}\" of relation \"{}\"",
                    field, table
                )));
            }
        }

        for fk in self.config.foreign_keys.iter().filter(|fk| fk.table == table) {
            let Some(id) = row.get(&fk.field).and_then(RecordId::from_json) else {
                continue;
            };
            let exists = state.tables.get(&fk.target_table).is_some_and(|rows| {
                rows.iter()
                    .any(|r| r.get("id").and_then(RecordId::from_json).as_ref() == Some(&id))
            });
            if !exists {
                return Err(InsertError::foreign_key(format!(
                    "{}.{} = {} is not present in \"{}\"",
                    table, fk.field, id, fk.target_table
                )));
            }
        }

        let existing = state.tables.get(table).map(Vec::as_slice).unwrap_or(&[]);
        for (t, fields) in &self.config.unique {
            if t != table {
                continue;
            }
            let collides = existing
                .iter()
                .any(|other| fields.iter().all(|f| other.get(f) == row.get(f)));
            if collides {
                return Err(InsertError::duplicate(format!(
                    "duplicate key value violates unique constraint on {}({})",
                    table,
                    fields.join(", ")
                )));
            }
        }

        Ok(())
    }
}

fn tenant_matches(row: &Row, field: &str, org: &str) -> bool {
    row.get(field).and_then(JsonValue::as_str) == Some(org)
}

fn sort_by_key(rows: &mut [Row], primary_key: &str) {
    rows.sort_by(|a, b| {
        let a = a.get(primary_key).and_then(RecordId::from_json);
        let b = b.get(primary_key).and_then(RecordId::from_json);
        a.cmp(&b)
    });
}

#[async_trait]
impl SourceSnapshotReader for InMemoryStore {
    async fn organization_exists(&self, org: Uuid) -> Result<bool> {
        Ok(self.lock().organizations.contains(&org))
    }

    async fn fetch_rows(&self, scope: &ScopeFilter, org: Uuid) -> Result<Vec<Row>> {
        let org = org.to_string();
        let state = self.lock();
        let table = state.tables.get(scope.table()).map(Vec::as_slice).unwrap_or(&[]);

        let mut rows: Vec<Row> = match scope {
            ScopeFilter::Column { tenant_field, .. } => table
                .iter()
                .filter(|row| tenant_matches(row, tenant_field, &org))
                .cloned()
                .collect(),
            ScopeFilter::Parent {
                parent_field,
                parent_table,
                parent_primary_key,
                parent_tenant_field,
                ..
            } => {
                let parents: HashSet<RecordId> = state
                    .tables
                    .get(parent_table)
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
                    .iter()
                    .filter(|row| tenant_matches(row, parent_tenant_field, &org))
                    .filter_map(|row| row.get(parent_primary_key).and_then(RecordId::from_json))
                    .collect();
                table
                    .iter()
                    .filter(|row| {
                        row.get(parent_field)
                            .and_then(RecordId::from_json)
                            .is_some_and(|id| parents.contains(&id))
                    })
                    .cloned()
                    .collect()
            }
        };

        sort_by_key(&mut rows, scope.primary_key());
        Ok(rows)
    }

    async fn row_in_tenant(&self, scope: &ScopeFilter, id: &RecordId, org: Uuid) -> Result<bool> {
        let rows = self.fetch_rows(scope, org).await?;
        Ok(rows.iter().any(|row| {
            row.get(scope.primary_key())
                .and_then(RecordId::from_json)
                .as_ref()
                == Some(id)
        }))
    }
}

#[async_trait]
impl TargetWriter for InMemoryStore {
    async fn organization_exists(&self, org: Uuid) -> Result<bool> {
        Ok(self.lock().organizations.contains(&org))
    }

    async fn insert_row(
        &self,
        table: &str,
        primary_key: &str,
        mut row: Row,
    ) -> std::result::Result<RecordId, InsertError> {
        if let Some(delay) = self.config.insert_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        self.check(&state, table, &row)?;

        let id = RecordId::Int(state.next_id);
        state.next_id += 1;
        state.inserts += 1;
        row.insert(primary_key.to_string(), id.to_json());
        state.tables.entry(table.to_string()).or_default().push(row);
        Ok(id)
    }
}
