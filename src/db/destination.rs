use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Any, AnyConnection, Connection, Executor};
use tracing::debug;

use super::adapter::Adapter;
use super::schema::{InsertValue, SqlParam, TableSchema};
use crate::dump::Row;
use crate::engine::Batch;
use crate::error::LoadError;

/// A live connection the engine writes through
#[async_trait]
pub trait Destination: Send {
    /// Check a table with `SELECT count(*)`; any failure means it does not exist
    async fn table_exists(&mut self, table: &str) -> bool;

    /// Execute one statement verbatim
    async fn execute(&mut self, sql: &str) -> Result<(), LoadError>;

    /// Write every row of `batch` atomically
    async fn write_batch(&mut self, batch: &Batch) -> Result<(), LoadError>;

    /// Run the adapter's shutdown action and close the connection
    async fn shutdown(self: Box<Self>) -> Result<(), LoadError>;
}

/// Opens destinations; one per writer
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Destination>, LoadError>;
}

/// Connects through an adapter to a database URL
pub struct SqlxConnector {
    adapter: Adapter,
    url: String,
}

impl SqlxConnector {
    pub fn new(adapter: Adapter, url: impl Into<String>) -> Self {
        Self {
            adapter,
            url: url.into(),
        }
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(&self) -> Result<Box<dyn Destination>, LoadError> {
        self.adapter.connect(&self.url).await
    }
}

/// `Destination` backed by a `sqlx::AnyConnection`
pub struct SqlxDestination {
    adapter: Adapter,
    conn: AnyConnection,
    /// Column types per table, looked up once when coercion is enabled
    schemas: HashMap<String, TableSchema>,
}

impl SqlxDestination {
    pub fn new(adapter: Adapter, conn: AnyConnection) -> Self {
        Self {
            adapter,
            conn,
            schemas: HashMap::new(),
        }
    }

    async fn table_schema(&mut self, table: &str, rows: usize) -> Result<TableSchema, LoadError> {
        if let Some(schema) = self.schemas.get(table) {
            return Ok(schema.clone());
        }

        let introspection = self.adapter.introspection();
        let mut query = sqlx::query_as::<Any, (String, String)>(introspection.query());
        for value in introspection.binds(table) {
            query = query.bind(value);
        }
        let columns = query
            .fetch_all(&mut self.conn)
            .await
            .map_err(LoadError::from_driver)?;
        if columns.is_empty() {
            return Err(LoadError::write_rejected(
                table,
                rows,
                "table not found or has no columns",
            ));
        }

        let schema = TableSchema::from_declared(columns);
        debug!(table, columns = schema.columns.len(), "Cached column types");
        self.schemas.insert(table.to_string(), schema.clone());
        Ok(schema)
    }
}

#[async_trait]
impl Destination for SqlxDestination {
    async fn table_exists(&mut self, table: &str) -> bool {
        let check = format!(
            "SELECT count(*) FROM {}",
            self.adapter.escape_identifier(table)
        );
        self.conn.execute(sqlx::raw_sql(&check)).await.is_ok()
    }

    async fn execute(&mut self, sql: &str) -> Result<(), LoadError> {
        self.conn
            .execute(sqlx::raw_sql(sql))
            .await
            .map(|_| ())
            .map_err(LoadError::from_statement)
    }

    async fn write_batch(&mut self, batch: &Batch) -> Result<(), LoadError> {
        if batch.rows.is_empty() {
            return Ok(());
        }
        let row_count = batch.rows.len();

        let schema = if self.adapter.parameter_conversion_enabled() {
            Some(self.table_schema(&batch.table, row_count).await?)
        } else {
            None
        };

        let width = batch
            .rows
            .iter()
            .map(|row| row.values.len())
            .max()
            .unwrap_or(1)
            .max(1);
        let rows_per_statement = (self.adapter.max_bind_params() / width).max(1);

        // Coerce everything before touching the connection
        let statements = batch
            .rows
            .chunks(rows_per_statement)
            .map(|chunk| {
                build_insert(
                    &self.adapter,
                    &batch.table,
                    batch.columns.as_deref(),
                    chunk,
                    schema.as_ref(),
                )
            })
            .collect::<Result<Vec<_>, String>>()
            .map_err(|message| LoadError::write_rejected(&batch.table, row_count, message))?;

        let mut tx = self.conn.begin().await.map_err(LoadError::from_driver)?;
        for (sql, params) in statements {
            let mut query = sqlx::query::<Any>(&sql);
            for param in params {
                query = param.bind(query);
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| LoadError::from_write(&batch.table, row_count, e))?;
        }
        tx.commit()
            .await
            .map_err(|e| LoadError::from_write(&batch.table, row_count, e))?;
        Ok(())
    }

    async fn shutdown(self: Box<Self>) -> Result<(), LoadError> {
        let SqlxDestination {
            adapter, mut conn, ..
        } = *self;

        let action = match adapter.on_shutdown() {
            Some(sql) => conn
                .execute(sqlx::raw_sql(sql))
                .await
                .map(|_| ())
                .map_err(LoadError::from_driver),
            None => Ok(()),
        };
        let closed = conn.close().await.map_err(LoadError::from_driver);
        action.and(closed)
    }
}

/// Build one multi-row INSERT and its parameters
///
/// Placeholders are numbered from 1 in every statement and only count bound
/// values; inlined expressions take no placeholder. A value that cannot be
/// coerced to its column type fails the whole statement.
pub fn build_insert(
    adapter: &Adapter,
    table: &str,
    columns: Option<&[String]>,
    rows: &[Row],
    schema: Option<&TableSchema>,
) -> Result<(String, Vec<SqlParam>), String> {
    let column_list = match columns {
        Some(names) if !names.is_empty() => format!(
            " ({})",
            names
                .iter()
                .map(|c| adapter.escape_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        _ => String::new(),
    };

    let mut params = Vec::new();
    let mut value_groups = Vec::with_capacity(rows.len());
    for row in rows {
        let mut placeholders = Vec::with_capacity(row.values.len());
        for (position, raw) in row.values.iter().enumerate() {
            let target = schema.and_then(|s| s.type_at(columns, position));
            match adapter.coerce_parameter(raw, target)? {
                InsertValue::Bind(param) => {
                    params.push(param);
                    placeholders.push(adapter.parameter_sql(params.len(), target));
                }
                InsertValue::Inline(expression) => placeholders.push(expression),
            }
        }
        value_groups.push(format!("({})", placeholders.join(", ")));
    }

    let sql = format!(
        "INSERT INTO {}{} VALUES {}",
        adapter.escape_identifier(table),
        column_list,
        value_groups.join(", ")
    );
    Ok((sql, params))
}
