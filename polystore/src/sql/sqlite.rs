//! SqliteDriver - embedded relational backend
//!
//! TigerStyle: One connection, bound parameters, JSON text for structure.
//!
//! SQLite has no array, boolean or timestamp types. Arrays and objects are
//! stored as JSON text and searched with `json_each`; booleans are
//! `INTEGER` 0/1; timestamps are RFC 3339 text at microsecond precision so
//! lexical order matches time order.

use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as Json;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Arguments, Row};

use super::{
    decode_row, driver_error, ColumnType, Dialect, RowAccess, SqlAdapter, SqlDriver, SqlParam,
    Statement, StoredRow, TableDef,
};
use crate::config::{AdapterConfig, SqliteConfig};
use crate::error::{BackendError, BackendResult};

/// Relational adapter over an embedded SQLite database.
pub type SqliteAdapter = SqlAdapter<SqliteDriver>;

// =============================================================================
// SqliteDriver
// =============================================================================

/// Single-connection SQLite pool.
///
/// The pool never recycles its connection: an in-memory database lives
/// exactly as long as that connection.
#[derive(Clone, Debug)]
pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    /// Open the database, creating the file if needed.
    ///
    /// # Errors
    /// Returns a `Driver` error if the database cannot be opened.
    pub async fn open(config: &SqliteConfig) -> BackendResult<Self> {
        let (options, location) = match &config.path {
            Some(path) => (
                SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true),
                path.display().to_string(),
            ),
            None => (
                SqliteConnectOptions::from_str("sqlite::memory:")
                    .map_err(|e| driver_error("open", "sqlite::memory:", &e))?,
                "sqlite::memory:".to_string(),
            ),
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| driver_error("open", &location, &e))?;

        tracing::info!(location = %location, "sqlite database open");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connection pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl SqlAdapter<SqliteDriver> {
    /// Open a database and build an adapter over it.
    ///
    /// # Errors
    /// Returns `Config` for invalid configuration or a `Driver` error if the
    /// database cannot be opened.
    pub async fn open(sqlite: &SqliteConfig, config: AdapterConfig) -> BackendResult<Self> {
        Self::new(SqliteDriver::open(sqlite).await?, config)
    }

    /// In-memory database.
    ///
    /// # Errors
    /// See [`SqlAdapter::open`].
    pub async fn in_memory(config: AdapterConfig) -> BackendResult<Self> {
        Self::open(&SqliteConfig::in_memory(), config).await
    }

    /// Close the connection. An in-memory database is dropped.
    pub async fn close(&self) {
        self.driver().pool.close().await;
    }
}

fn timestamp_text(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn json_text<T: serde::Serialize>(sql: &str, value: &T) -> BackendResult<String> {
    serde_json::to_string(value).map_err(|e| BackendError::driver("bind", sql, e.to_string()))
}

fn arguments<'q>(statement: &Statement) -> BackendResult<SqliteArguments<'q>> {
    let sql = statement.sql.as_str();
    let mut args = SqliteArguments::default();
    for param in &statement.params {
        let added = match param.clone() {
            SqlParam::Null(ColumnType::Real) => Arguments::add(&mut args, None::<f64>),
            SqlParam::Null(ColumnType::Integer | ColumnType::Boolean) => {
                Arguments::add(&mut args, None::<i64>)
            }
            SqlParam::Null(_) => Arguments::add(&mut args, None::<String>),
            SqlParam::Text(v) => Arguments::add(&mut args, v),
            SqlParam::Real(v) => Arguments::add(&mut args, v),
            SqlParam::Integer(v) => Arguments::add(&mut args, v),
            SqlParam::Bool(v) => Arguments::add(&mut args, v),
            SqlParam::Timestamp(v) => Arguments::add(&mut args, timestamp_text(&v)),
            SqlParam::TextArray(v) => Arguments::add(&mut args, json_text(sql, &v)?),
            SqlParam::RealArray(v) => Arguments::add(&mut args, json_text(sql, &v)?),
            SqlParam::IntegerArray(v) => Arguments::add(&mut args, json_text(sql, &v)?),
            SqlParam::Json(v) => Arguments::add(&mut args, v.to_string()),
        };
        added.map_err(|e| BackendError::driver("bind", sql, e.to_string()))?;
    }
    Ok(args)
}

#[async_trait]
impl SqlDriver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn table_columns(&self, table: &str) -> BackendResult<Option<BTreeSet<String>>> {
        let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
            .bind(table)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| driver_error("introspect", table, &e))?;

        Ok((!columns.is_empty()).then(|| columns.into_iter().collect()))
    }

    async fn execute(&self, operation: &str, statement: &Statement) -> BackendResult<u64> {
        let result = sqlx::query_with(&statement.sql, arguments(statement)?)
            .execute(&self.pool)
            .await
            .map_err(|e| driver_error(operation, &statement.sql, &e))?;
        Ok(result.rows_affected())
    }

    async fn fetch(
        &self,
        statement: &Statement,
        table: &TableDef,
        joined: &[String],
    ) -> BackendResult<Vec<StoredRow>> {
        let rows = sqlx::query_with(&statement.sql, arguments(statement)?)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| driver_error("find", &statement.sql, &e))?;

        rows.iter().map(|row| decode_row(row, table, joined)).collect()
    }

    async fn fetch_count(&self, statement: &Statement) -> BackendResult<u64> {
        let count: i64 = sqlx::query_scalar_with(&statement.sql, arguments(statement)?)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| driver_error("count", &statement.sql, &e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// =============================================================================
// Row Mapping
// =============================================================================

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> BackendResult<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get::<Option<T>, _>(column)
        .map_err(|e| BackendError::driver("decode", column, e.to_string()))
}

fn parse_json(column: &str, text: &str) -> BackendResult<Json> {
    serde_json::from_str(text).map_err(|e| BackendError::driver("decode", column, e.to_string()))
}

impl RowAccess for SqliteRow {
    fn text(&self, column: &str) -> BackendResult<Option<String>> {
        get(self, column)
    }

    fn real(&self, column: &str) -> BackendResult<Option<f64>> {
        get(self, column)
    }

    fn integer(&self, column: &str) -> BackendResult<Option<i64>> {
        get(self, column)
    }

    fn boolean(&self, column: &str) -> BackendResult<Option<bool>> {
        Ok(get::<i64>(self, column)?.map(|v| v != 0))
    }

    fn timestamp(&self, column: &str) -> BackendResult<Option<DateTime<Utc>>> {
        get::<String>(self, column)?
            .map(|text| {
                DateTime::parse_from_rfc3339(&text)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| BackendError::driver("decode", column, e.to_string()))
            })
            .transpose()
    }

    fn text_array(&self, column: &str) -> BackendResult<Option<Vec<String>>> {
        let Some(text) = get::<String>(self, column)? else {
            return Ok(None);
        };
        let items = match parse_json(column, &text)? {
            Json::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Json::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            other => {
                return Err(BackendError::driver(
                    "decode",
                    column,
                    format!("expected a JSON array, got {other}"),
                ))
            }
        };
        Ok(Some(items))
    }

    fn json(&self, column: &str) -> BackendResult<Option<Json>> {
        get::<String>(self, column)?
            .map(|text| parse_json(column, &text))
            .transpose()
    }
}
