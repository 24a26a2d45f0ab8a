//! PostgreSQL reader and writer for clone jobs.
//!
//! Rows travel as JSON objects in both directions: reads use `to_jsonb` on
//! the whole row, inserts use `jsonb_populate_record` so each value is cast
//! to its column type by the database. `numeric` columns are read as text
//! so their full precision survives the trip through JSON. Table and column
//! names come from the registry and are validated before being
//! interpolated.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::error::ErrorKind;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::{debug, trace};
use uuid::Uuid;

use orgclone_core::{
    defaults, Error, InsertError, RecordId, Result, Row, RowErrorKind, ScopeFilter,
    SourceSnapshotReader, TargetWriter,
};

use crate::identifier::quote_identifier;

/// Reads the source tenant and writes the target tenant through one pool.
#[derive(Debug, Clone)]
pub struct PgCloneStore {
    pool: PgPool,
    organization_table: String,
}

impl PgCloneStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            organization_table: defaults::ORGANIZATION_TABLE.to_string(),
        }
    }

    /// Use a different table for organization existence checks. The table
    /// must have a `uuid` column named `id`.
    pub fn with_organization_table(mut self, table: impl Into<String>) -> Self {
        self.organization_table = table.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn numeric_columns(&self, table: &str) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(NUMERIC_COLUMNS_SQL)
            .bind(quote_identifier(table)?)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)
    }

    async fn organization_row_exists(&self, org: Uuid) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id = $1)",
            quote_identifier(&self.organization_table)?
        );
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(org)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

const NUMERIC_COLUMNS_SQL: &str = "SELECT attname::text FROM pg_attribute \
     WHERE attrelid = $1::regclass AND atttypid = 'numeric'::regtype \
     AND attnum > 0 AND NOT attisdropped ORDER BY attnum";

/// `FROM ... WHERE ...` fragment selecting the tenant's rows as `t`, with
/// the organization bound to `$1`.
fn scoped_from(scope: &ScopeFilter) -> Result<String> {
    match scope {
        ScopeFilter::Column {
            table,
            tenant_field,
            ..
        } => Ok(format!(
            "FROM {} t WHERE t.{} = $1",
            quote_identifier(table)?,
            quote_identifier(tenant_field)?
        )),
        ScopeFilter::Parent {
            table,
            parent_field,
            parent_table,
            parent_primary_key,
            parent_tenant_field,
            ..
        } => Ok(format!(
            "FROM {} t JOIN {} p ON t.{} = p.{} WHERE p.{} = $1",
            quote_identifier(table)?,
            quote_identifier(parent_table)?,
            quote_identifier(parent_field)?,
            quote_identifier(parent_primary_key)?,
            quote_identifier(parent_tenant_field)?
        )),
    }
}

/// Whole-row select; `numeric_columns` are overlaid as JSON strings.
fn select_rows_sql(scope: &ScopeFilter, numeric_columns: &[String]) -> Result<String> {
    let mut row = "to_jsonb(t)".to_string();
    for column in numeric_columns {
        let quoted = quote_identifier(column)?;
        row.push_str(&format!(
            " || jsonb_build_object('{}', t.{}::text)",
            column, quoted
        ));
    }
    Ok(format!(
        "SELECT {} {} ORDER BY t.{}",
        row,
        scoped_from(scope)?,
        quote_identifier(scope.primary_key())?
    ))
}

fn row_exists_sql(scope: &ScopeFilter) -> Result<String> {
    Ok(format!(
        "SELECT EXISTS (SELECT 1 {} AND t.{}::text = $2)",
        scoped_from(scope)?,
        quote_identifier(scope.primary_key())?
    ))
}

fn insert_sql(table: &str, primary_key: &str, row: &Row) -> Result<String> {
    let table = quote_identifier(table)?;
    let returning = format!("RETURNING to_jsonb({})", quote_identifier(primary_key)?);
    if row.is_empty() {
        return Ok(format!("INSERT INTO {} DEFAULT VALUES {}", table, returning));
    }

    let columns = row
        .keys()
        .map(|c| quote_identifier(c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");
    Ok(format!(
        "INSERT INTO {table} ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1) {returning}"
    ))
}

/// Map a database error onto the row failure taxonomy.
fn classify(err: sqlx::Error) -> InsertError {
    match &err {
        sqlx::Error::Database(db) => {
            let kind = match db.kind() {
                ErrorKind::UniqueViolation => RowErrorKind::Duplicate,
                ErrorKind::ForeignKeyViolation => RowErrorKind::ForeignKey,
                ErrorKind::NotNullViolation | ErrorKind::CheckViolation => {
                    RowErrorKind::Validation
                }
                // Class 22: data exception (bad cast, out of range, ...).
                _ if db.code().is_some_and(|code| code.starts_with("22")) => {
                    RowErrorKind::Validation
                }
                _ => RowErrorKind::Store,
            };
            InsertError::new(kind, db.message())
        }
        other => InsertError::store(other.to_string()),
    }
}

#[async_trait]
impl SourceSnapshotReader for PgCloneStore {
    async fn organization_exists(&self, org: Uuid) -> Result<bool> {
        self.organization_row_exists(org).await
    }

    async fn fetch_rows(&self, scope: &ScopeFilter, org: Uuid) -> Result<Vec<Row>> {
        let start = Instant::now();
        let numeric_columns = self.numeric_columns(scope.table()).await?;
        let sql = select_rows_sql(scope, &numeric_columns)?;

        let rows: Vec<Json<Row>> = sqlx::query_scalar(&sql)
            .bind(org)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        debug!(
            subsystem = "database",
            component = "store",
            op = "fetch_rows",
            db_table = scope.table(),
            row_count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetched tenant rows"
        );
        Ok(rows.into_iter().map(|Json(row)| row).collect())
    }

    async fn row_in_tenant(&self, scope: &ScopeFilter, id: &RecordId, org: Uuid) -> Result<bool> {
        let sql = row_exists_sql(scope)?;
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(org)
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }
}

#[async_trait]
impl TargetWriter for PgCloneStore {
    async fn organization_exists(&self, org: Uuid) -> Result<bool> {
        self.organization_row_exists(org).await
    }

    async fn insert_row(
        &self,
        table: &str,
        primary_key: &str,
        row: Row,
    ) -> std::result::Result<RecordId, InsertError> {
        let sql = insert_sql(table, primary_key, &row)
            .map_err(|e| InsertError::validation(e.to_string()))?;

        let returned: JsonValue = sqlx::query_scalar(&sql)
            .bind(Json(&row))
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

        let id = RecordId::from_json(&returned).ok_or_else(|| {
            InsertError::store(format!("{} returned an unusable key: {}", table, returned))
        })?;
        trace!(
            subsystem = "database",
            component = "store",
            op = "insert_row",
            db_table = table,
            new_id = %id,
            "Inserted row"
        );
        Ok(id)
    }
}
