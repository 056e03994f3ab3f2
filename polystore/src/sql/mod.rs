//! Relational Adapters
//!
//! TigerStyle: One adapter over two SQL engines. Statement building is
//! pure and shared; each driver only binds parameters, runs statements and
//! reads typed columns.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SqlAdapter<D>                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  builder     │ TableDef, SelectBuilder, INSERT/UPDATE/DELETE │
//! │  catalog     │ tables and columns, introspected lazily      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SqlDriver   │ PostgresDriver (PgPool)                      │
//! │              │ SqliteDriver (one connection)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Identifiers cannot be bound, so table, column and alias names are
//! validated against `[A-Za-z_][A-Za-z0-9_]*` and double-quoted. Every value,
//! including `LIMIT` and `OFFSET`, is a bound parameter.

mod adapter;
mod builder;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polystore_core::{StorageClass, SQL_IDENTIFIER_CHARS_MAX};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::{BackendError, BackendResult};

pub use adapter::{SqlAdapter, SQL_DELETE_BATCH_COUNT_DEFAULT};
pub use builder::{Catalog, ColumnDef, Select, SelectBuilder, TableDef};
#[cfg(feature = "postgres")]
pub use postgres::{PostgresAdapter, PostgresDriver};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteAdapter, SqliteDriver};

/// Primary key column of every table.
pub const ID_COLUMN: &str = "id";

/// Suffix of the projected `{ref, path, label}` column of a joined reference.
pub const REF_PROJECTION_SUFFIX: &str = "__ref";

// =============================================================================
// Dialect
// =============================================================================

/// SQL flavour a driver speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Client/server, native arrays and JSONB
    Postgres,
    /// Embedded, arrays and objects as JSON text
    Sqlite,
}

impl Dialect {
    /// Placeholder for the `n`-th parameter, 1-based.
    #[must_use]
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::Sqlite => "?".to_string(),
        }
    }

    /// Column type declaration.
    #[must_use]
    pub fn column_sql(self, ty: ColumnType) -> &'static str {
        match (self, ty) {
            (Self::Postgres, ColumnType::Text) => "TEXT",
            (Self::Postgres, ColumnType::Real) => "DOUBLE PRECISION",
            (Self::Postgres, ColumnType::Integer) => "BIGINT",
            (Self::Postgres, ColumnType::Boolean) => "BOOLEAN",
            (Self::Postgres, ColumnType::Timestamp) => "TIMESTAMPTZ",
            (Self::Postgres, ColumnType::TextArray) => "TEXT[]",
            (Self::Postgres, ColumnType::Json) => "JSONB",
            (Self::Sqlite, ColumnType::Real) => "REAL",
            (Self::Sqlite, ColumnType::Integer | ColumnType::Boolean) => "INTEGER",
            (
                Self::Sqlite,
                ColumnType::Text | ColumnType::Timestamp | ColumnType::TextArray | ColumnType::Json,
            ) => "TEXT",
        }
    }

    /// Function building a JSON object from key/value arguments.
    #[must_use]
    pub fn json_object_fn(self) -> &'static str {
        match self {
            Self::Postgres => "json_build_object",
            Self::Sqlite => "json_object",
        }
    }

    /// Case-insensitive pattern operator.
    #[must_use]
    pub fn like_op(self) -> &'static str {
        match self {
            Self::Postgres => "ILIKE",
            Self::Sqlite => "LIKE",
        }
    }

    /// Raw identifier of a stored `{ref, label}` object: the last segment of
    /// its `ref` path.
    #[must_use]
    pub fn ref_id_expr(self, expr: &str) -> String {
        match self {
            Self::Postgres => format!("regexp_replace({expr}->>'ref', '^.*/', '')"),
            Self::Sqlite => {
                let path = format!("json_extract({expr}, '$.ref')");
                format!("substr({path}, length(rtrim({path}, replace({path}, '/', ''))) + 1)")
            }
        }
    }
}

// =============================================================================
// Columns and Parameters
// =============================================================================

/// Logical column type, declared per dialect by [`Dialect::column_sql`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    /// Text, also native foreign keys
    Text,
    /// 64-bit float
    Real,
    /// 64-bit integer
    Integer,
    /// Boolean
    Boolean,
    /// UTC timestamp
    Timestamp,
    /// List of text
    TextArray,
    /// JSON object, also `{ref, label}` references
    Json,
}

impl ColumnType {
    /// Column type for a storage class. References collapse to a text
    /// foreign key when native keys are in use.
    #[must_use]
    pub fn for_storage(class: StorageClass, native_reference: bool) -> Self {
        match class {
            StorageClass::Text => Self::Text,
            StorageClass::Real => Self::Real,
            StorageClass::Integer => Self::Integer,
            StorageClass::Boolean => Self::Boolean,
            StorageClass::Timestamp => Self::Timestamp,
            StorageClass::TextArray => Self::TextArray,
            StorageClass::Reference if native_reference => Self::Text,
            StorageClass::Reference | StorageClass::Json | StorageClass::Virtual => Self::Json,
        }
    }
}

/// A bound value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Typed `NULL`
    Null(ColumnType),
    /// Text
    Text(String),
    /// Float
    Real(f64),
    /// Integer
    Integer(i64),
    /// Boolean
    Bool(bool),
    /// Timestamp
    Timestamp(DateTime<Utc>),
    /// List of text
    TextArray(Vec<String>),
    /// List of floats
    RealArray(Vec<f64>),
    /// List of integers
    IntegerArray(Vec<i64>),
    /// JSON document
    Json(Json),
}

/// SQL text plus its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text
    pub sql: String,
    /// Bound values
    pub params: Vec<SqlParam>,
}

impl Statement {
    /// Statement without parameters.
    #[must_use]
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Parameter list that hands out placeholders as values are pushed.
#[derive(Debug, Clone)]
pub(crate) struct Params {
    dialect: Dialect,
    values: Vec<SqlParam>,
}

impl Params {
    pub(crate) fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Add a value, returning its placeholder.
    pub(crate) fn push(&mut self, value: SqlParam) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    pub(crate) fn values(&self) -> &[SqlParam] {
        &self.values
    }

    pub(crate) fn into_statement(self, sql: String) -> Statement {
        Statement {
            sql,
            params: self.values,
        }
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Validate a table, column or alias name.
///
/// # Errors
/// Returns `Config` unless the name matches `[A-Za-z_][A-Za-z0-9_]*` and
/// fits the identifier length limit.
pub fn check_identifier(ident: &str) -> BackendResult<&str> {
    let mut chars = ident.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid_head || !valid_tail || ident.len() > SQL_IDENTIFIER_CHARS_MAX {
        return Err(BackendError::config(format!(
            "'{ident}' is not a valid SQL identifier"
        )));
    }
    Ok(ident)
}

/// Double-quote an already validated identifier.
#[must_use]
pub(crate) fn quote(ident: &str) -> String {
    debug_assert!(check_identifier(ident).is_ok(), "unchecked identifier {ident}");
    format!("\"{ident}\"")
}

// =============================================================================
// Drivers
// =============================================================================

/// Row decoded into stored JSON, keyed by property name, plus its id.
pub type StoredRow = (String, JsonMap<String, Json>);

/// Connection to one SQL engine.
#[async_trait]
pub trait SqlDriver: Send + Sync + 'static {
    /// SQL flavour.
    fn dialect(&self) -> Dialect;

    /// Column names of a table, `None` if it does not exist.
    async fn table_columns(&self, table: &str) -> BackendResult<Option<BTreeSet<String>>>;

    /// Run a statement, returning the affected row count.
    async fn execute(&self, operation: &str, statement: &Statement) -> BackendResult<u64>;

    /// Run a query and decode every row against a table definition.
    async fn fetch(
        &self,
        statement: &Statement,
        table: &TableDef,
        joined: &[String],
    ) -> BackendResult<Vec<StoredRow>>;

    /// Run a `COUNT(*)` query.
    async fn fetch_count(&self, statement: &Statement) -> BackendResult<u64>;
}

/// Typed column access over a driver row.
pub(crate) trait RowAccess {
    fn text(&self, column: &str) -> BackendResult<Option<String>>;
    fn real(&self, column: &str) -> BackendResult<Option<f64>>;
    fn integer(&self, column: &str) -> BackendResult<Option<i64>>;
    fn boolean(&self, column: &str) -> BackendResult<Option<bool>>;
    fn timestamp(&self, column: &str) -> BackendResult<Option<DateTime<Utc>>>;
    fn text_array(&self, column: &str) -> BackendResult<Option<Vec<String>>>;
    fn json(&self, column: &str) -> BackendResult<Option<Json>>;
}

/// Decode a row into stored JSON. A joined reference projection wins over
/// the raw reference column.
pub(crate) fn decode_row(
    row: &impl RowAccess,
    table: &TableDef,
    joined: &[String],
) -> BackendResult<StoredRow> {
    let id = row
        .text(ID_COLUMN)?
        .ok_or_else(|| BackendError::driver("decode", &table.name, "row without id"))?;

    let mut data = JsonMap::new();
    for column in &table.columns {
        let projected = if joined.contains(&column.name) {
            row.json(&format!("{}{REF_PROJECTION_SUFFIX}", column.name))?
                .filter(|json| !json.is_null())
        } else {
            None
        };
        let value = match projected {
            Some(json) => json,
            None => decode_column(row, column)?,
        };
        data.insert(column.name.clone(), value);
    }
    Ok((id, data))
}

fn decode_column(row: &impl RowAccess, column: &ColumnDef) -> BackendResult<Json> {
    let name = column.name.as_str();
    Ok(match column.ty {
        ColumnType::Text => match row.text(name)? {
            None => Json::Null,
            Some(id) if column.class == StorageClass::Reference => match &column.target {
                Some(target) => json!({ "ref": format!("{target}/{id}") }),
                None => Json::String(id),
            },
            Some(text) => Json::String(text),
        },
        ColumnType::Real => row
            .real(name)?
            .and_then(serde_json::Number::from_f64)
            .map_or(Json::Null, Json::Number),
        ColumnType::Integer => row.integer(name)?.map_or(Json::Null, Json::from),
        ColumnType::Boolean => row.boolean(name)?.map_or(Json::Null, Json::Bool),
        ColumnType::Timestamp => row
            .timestamp(name)?
            .map_or(Json::Null, |dt| Json::String(dt.to_rfc3339())),
        ColumnType::TextArray => row.text_array(name)?.map_or(Json::Null, |items| {
            Json::Array(items.into_iter().map(Json::String).collect())
        }),
        ColumnType::Json => row.json(name)?.unwrap_or(Json::Null),
    })
}

/// Wrap a sqlx failure. Unique violations become `AlreadyExists`; pool and
/// I/O failures are transient.
#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub(crate) fn driver_error(operation: &str, context: &str, err: &sqlx::Error) -> BackendError {
    if err
        .as_database_error()
        .is_some_and(|db| db.is_unique_violation())
    {
        return BackendError::already_exists(context);
    }

    let wrapped = BackendError::driver(operation, context, err.to_string());
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => wrapped.transient(),
        _ => wrapped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(check_identifier("user_profile").is_ok());
        assert!(check_identifier("_x1").is_ok());
        assert!(check_identifier("1user").is_err());
        assert!(check_identifier("user; DROP TABLE x").is_err());
        assert!(check_identifier("\"quoted\"").is_err());
        assert!(check_identifier("").is_err());
        assert!(check_identifier(&"a".repeat(SQL_IDENTIFIER_CHARS_MAX + 1)).is_err());
    }

    #[test]
    fn test_placeholders_follow_dialect() {
        let mut pg = Params::new(Dialect::Postgres);
        assert_eq!(pg.push(SqlParam::Integer(1)), "$1");
        assert_eq!(pg.push(SqlParam::Integer(2)), "$2");

        let mut lite = Params::new(Dialect::Sqlite);
        assert_eq!(lite.push(SqlParam::Integer(1)), "?");
        assert_eq!(lite.values().len(), 1);
    }

    #[test]
    fn test_reference_columns() {
        assert_eq!(
            ColumnType::for_storage(StorageClass::Reference, true),
            ColumnType::Text
        );
        assert_eq!(
            ColumnType::for_storage(StorageClass::Reference, false),
            ColumnType::Json
        );
        assert_eq!(Dialect::Sqlite.column_sql(ColumnType::Boolean), "INTEGER");
        assert_eq!(Dialect::Postgres.column_sql(ColumnType::TextArray), "TEXT[]");
    }
}
