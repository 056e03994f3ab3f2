//! PostgresDriver - client/server relational backend
//!
//! TigerStyle: Pooled connections, bound parameters, explicit errors.
//!
//! # Column Types
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS "user" (
//!     "id" TEXT PRIMARY KEY,
//!     "name" TEXT,                 -- Text
//!     "age" BIGINT,                -- Integer
//!     "score" DOUBLE PRECISION,    -- Real
//!     "active" BOOLEAN,            -- Boolean
//!     "created_at" TIMESTAMPTZ,    -- Timestamp
//!     "tags" TEXT[],               -- TextArray, keywords
//!     "entity" JSONB               -- Json, {ref, label} references
//! );
//! ```

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as Json;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::{Arguments, Row};

use super::{
    decode_row, driver_error, ColumnType, Dialect, RowAccess, SqlAdapter, SqlDriver, SqlParam,
    Statement, StoredRow, TableDef,
};
use crate::config::{AdapterConfig, PostgresConfig};
use crate::error::{BackendError, BackendResult};

/// Relational adapter over PostgreSQL.
pub type PostgresAdapter = SqlAdapter<PostgresDriver>;

// =============================================================================
// PostgresDriver
// =============================================================================

/// Pooled PostgreSQL connection.
#[derive(Clone, Debug)]
pub struct PostgresDriver {
    pool: PgPool,
}

impl PostgresDriver {
    /// Open a connection pool.
    ///
    /// # Errors
    /// Returns `Config` for an invalid configuration, or a transient
    /// `Driver` error if no connection can be made.
    pub async fn connect(config: &PostgresConfig) -> BackendResult<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| driver_error("connect", "postgres", &e).transient())?;

        tracing::info!(max_connections = config.max_connections, "postgres pool ready");
        Ok(Self { pool })
    }

    /// Wrap an existing pool, to share it across adapters.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SqlAdapter<PostgresDriver> {
    /// Connect and build an adapter.
    ///
    /// # Errors
    /// Returns `Config` for invalid configuration or a `Driver` error if the
    /// pool cannot connect.
    pub async fn connect(postgres: &PostgresConfig, config: AdapterConfig) -> BackendResult<Self> {
        Self::new(PostgresDriver::connect(postgres).await?, config)
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.driver().pool.close().await;
    }
}

fn arguments(statement: &Statement) -> BackendResult<PgArguments> {
    let mut args = PgArguments::default();
    for param in &statement.params {
        let added = match param.clone() {
            SqlParam::Null(ColumnType::Text) => Arguments::add(&mut args, None::<String>),
            SqlParam::Null(ColumnType::Real) => Arguments::add(&mut args, None::<f64>),
            SqlParam::Null(ColumnType::Integer) => Arguments::add(&mut args, None::<i64>),
            SqlParam::Null(ColumnType::Boolean) => Arguments::add(&mut args, None::<bool>),
            SqlParam::Null(ColumnType::Timestamp) => {
                Arguments::add(&mut args, None::<DateTime<Utc>>)
            }
            SqlParam::Null(ColumnType::TextArray) => {
                Arguments::add(&mut args, None::<Vec<String>>)
            }
            SqlParam::Null(ColumnType::Json) => Arguments::add(&mut args, None::<Json>),
            SqlParam::Text(v) => Arguments::add(&mut args, v),
            SqlParam::Real(v) => Arguments::add(&mut args, v),
            SqlParam::Integer(v) => Arguments::add(&mut args, v),
            SqlParam::Bool(v) => Arguments::add(&mut args, v),
            SqlParam::Timestamp(v) => Arguments::add(&mut args, v),
            SqlParam::TextArray(v) => Arguments::add(&mut args, v),
            SqlParam::RealArray(v) => Arguments::add(&mut args, v),
            SqlParam::IntegerArray(v) => Arguments::add(&mut args, v),
            SqlParam::Json(v) => Arguments::add(&mut args, v),
        };
        added.map_err(|e| BackendError::driver("bind", &statement.sql, e.to_string()))?;
    }
    Ok(args)
}

#[async_trait]
impl SqlDriver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn table_columns(&self, table: &str) -> BackendResult<Option<BTreeSet<String>>> {
        let sql = "SELECT column_name::TEXT FROM information_schema.columns \
                   WHERE table_schema = current_schema() AND table_name = $1";
        let columns: Vec<String> = sqlx::query_scalar(sql)
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

fn get<'r, T>(row: &'r PgRow, column: &str) -> BackendResult<Option<T>>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<Option<T>, _>(column)
        .map_err(|e| BackendError::driver("decode", column, e.to_string()))
}

impl RowAccess for PgRow {
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
        get(self, column)
    }

    fn timestamp(&self, column: &str) -> BackendResult<Option<DateTime<Utc>>> {
        get(self, column)
    }

    fn text_array(&self, column: &str) -> BackendResult<Option<Vec<String>>> {
        get(self, column)
    }

    fn json(&self, column: &str) -> BackendResult<Option<Json>> {
        get(self, column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::BackendAdapter;
    use crate::middleware::KeywordsMiddleware;
    use polystore_core::{Filter, Filters, ModelSchema, Operator, Query, Record};
    use std::env;

    /// Get test database URL from environment.
    fn test_db_url() -> Option<String> {
        env::var("TEST_POSTGRES_URL").ok()
    }

    /// Skip test if no database available.
    macro_rules! require_db {
        () => {
            match test_db_url() {
                Some(url) => url,
                None => {
                    eprintln!("Skipping test: TEST_POSTGRES_URL not set");
                    return;
                }
            }
        };
    }

    fn schema(collection: &str) -> std::sync::Arc<ModelSchema> {
        ModelSchema::builder("Note")
            .collection(collection)
            .with_base_properties()
            .integer("rank")
            .array("tags")
            .build()
            .unwrap()
    }

    async fn adapter(url: String) -> PostgresAdapter {
        PostgresAdapter::connect(
            &PostgresConfig::new(url).with_max_connections(2),
            AdapterConfig::new("pg").with_soft_delete(true),
        )
        .await
        .unwrap()
        .with_middleware(KeywordsMiddleware::new())
        .unwrap()
    }

    #[test]
    fn test_binds_typed_nulls() {
        let statement = Statement {
            sql: "SELECT $1, $2".to_string(),
            params: vec![
                SqlParam::Null(ColumnType::TextArray),
                SqlParam::Null(ColumnType::Json),
            ],
        };
        assert!(arguments(&statement).is_ok());
    }

    #[tokio::test]
    async fn test_postgres_round_trip() {
        let url = require_db!();
        let adapter = adapter(url).await;
        let schema = schema("pg_notes_round_trip");
        adapter.delete_collection("pg_notes_round_trip", None).await.unwrap();

        let mut note = Record::new(schema.clone());
        note.set("name", "Quarterly Report").unwrap();
        note.set("rank", 3).unwrap();
        note.set("tags", vec!["a", "b"]).unwrap();
        adapter.create(&mut note, Some("n1")).await.unwrap();
        assert_eq!(note.uri().literal(), "pg:pg_notes_round_trip/n1");

        let mut twin = Record::new(schema.clone());
        let err = adapter.create(&mut twin, Some("n1")).await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists { .. }));

        let mut loaded = Record::new(schema.clone());
        loaded.set_uri(note.uri().clone());
        adapter.read(&mut loaded).await.unwrap();
        assert_eq!(loaded.val("rank").as_i64(), Some(3));
        assert_eq!(loaded.val("tags"), note.val("tags"));

        let result = adapter
            .query(
                &Query::new(schema.clone())
                    .filter(Filter::equals("keywords", "QUA"))
                    .filter(Filter::new("rank", Operator::LowerOrEquals, 3)),
            )
            .await
            .unwrap();
        assert_eq!(result.meta.count, 1);

        adapter.delete(&mut note, true).await.unwrap();
        let err = adapter.read(&mut loaded).await.unwrap_err();
        assert!(err.is_not_found());

        adapter.close().await;
    }

    #[tokio::test]
    async fn test_postgres_missing_table_is_empty() {
        let url = require_db!();
        let adapter = adapter(url).await;
        let schema = schema("pg_never_created");

        adapter.delete_collection("pg_never_created", Some(10)).await.unwrap();
        let result = adapter
            .find(
                &Record::new(schema),
                &Filters::new(),
                &polystore_core::SortAndLimit::default(),
                &crate::adapter::Scope::Collection,
            )
            .await
            .unwrap();
        assert_eq!(result.meta.count, 0);
        adapter.close().await;
    }
}
