//! SQL Statement Builder
//!
//! TigerStyle: Pure functions from schemas, records and queries to
//! parameterised statements. Nothing here touches a connection.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use polystore_core::{
    Filter, Filters, Limits, ModelSchema, ObjectUri, Operator, Record, SortAndLimit, SortOrder,
    StorageClass, Value, PROPERTY_KEYWORDS, PROPERTY_NAME, PROPERTY_UID,
};

use super::{check_identifier, quote, ColumnType, Dialect, Params, SqlParam, Statement};
use super::{ID_COLUMN, REF_PROJECTION_SUFFIX};
use crate::adapter::{AdapterCore, Scope};
use crate::error::{BackendError, BackendResult};

/// Alias of the queried table.
const MAIN_ALIAS: &str = "coll";

/// Known tables and their columns.
pub type Catalog = HashMap<String, BTreeSet<String>>;

// =============================================================================
// Table Definitions
// =============================================================================

/// One persisted property as a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    /// Column and property name
    pub name: String,
    /// Storage class of the property
    pub class: StorageClass,
    /// Column type
    pub ty: ColumnType,
    /// Table a reference points at, when resolvable
    pub target: Option<String>,
}

/// Table backing one model.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    /// Table name
    pub name: String,
    /// Property columns, in declaration order
    pub columns: Vec<ColumnDef>,
    /// Whether a keywords column is kept
    pub keywords: bool,
}

impl TableDef {
    /// Resolve the table of a model under an adapter's configuration.
    ///
    /// # Errors
    /// Returns `Config` for names that are not valid identifiers or a
    /// property colliding with the primary key.
    pub fn for_schema(core: &AdapterCore, schema: &ModelSchema) -> BackendResult<Self> {
        let name = check_identifier(core.collection_of(schema)?)?.to_string();
        let native = core.config().use_native_foreign_keys;

        let columns = schema
            .persisted_properties()
            .map(|property| {
                let column = check_identifier(property.name())?;
                if column == ID_COLUMN {
                    return Err(BackendError::config(format!(
                        "property '{column}' of {} collides with the primary key",
                        schema.name()
                    )));
                }
                let target = core
                    .reference_collection(property)
                    .map(|t| check_identifier(&t).map(str::to_string))
                    .transpose()?;
                Ok(ColumnDef {
                    name: column.to_string(),
                    class: property.storage(),
                    ty: ColumnType::for_storage(property.storage(), native && target.is_some()),
                    target,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        Ok(Self {
            name,
            columns,
            keywords: core.keywords_enabled(),
        })
    }

    /// Column definition by property name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Every column name, primary key and keywords included.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(ID_COLUMN)
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .chain(self.keywords.then_some(PROPERTY_KEYWORDS))
    }
}

// =============================================================================
// Schema Statements
// =============================================================================

/// `CREATE TABLE IF NOT EXISTS`. Native foreign keys are declared only for
/// targets already in the catalog.
#[must_use]
pub fn create_table(dialect: Dialect, table: &TableDef, catalog: &Catalog) -> Statement {
    let mut definitions = vec![format!("{} TEXT PRIMARY KEY", quote(ID_COLUMN))];

    for column in &table.columns {
        let mut definition = format!("{} {}", quote(&column.name), dialect.column_sql(column.ty));
        if let Some(target) = native_target(column).filter(|t| catalog.contains_key(*t)) {
            definition.push_str(&format!(
                " REFERENCES {}({}) ON DELETE SET NULL",
                quote(target),
                quote(ID_COLUMN)
            ));
        }
        definitions.push(definition);
    }
    if table.keywords {
        definitions.push(format!(
            "{} {}",
            quote(PROPERTY_KEYWORDS),
            dialect.column_sql(ColumnType::TextArray)
        ));
    }

    Statement::plain(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&table.name),
        definitions.join(", ")
    ))
}

/// `ALTER TABLE ADD COLUMN` for every column the table lacks.
#[must_use]
pub fn add_columns(
    dialect: Dialect,
    table: &TableDef,
    existing: &BTreeSet<String>,
) -> Vec<Statement> {
    let guard = match dialect {
        Dialect::Postgres => "IF NOT EXISTS ",
        Dialect::Sqlite => "",
    };
    let keywords = table.keywords.then_some((PROPERTY_KEYWORDS, ColumnType::TextArray));

    table
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.ty))
        .chain(keywords)
        .filter(|(name, _)| !existing.contains(*name))
        .map(|(name, ty)| {
            Statement::plain(format!(
                "ALTER TABLE {} ADD COLUMN {guard}{} {}",
                quote(&table.name),
                quote(name),
                dialect.column_sql(ty)
            ))
        })
        .collect()
}

fn native_target(column: &ColumnDef) -> Option<&str> {
    (column.class == StorageClass::Reference && column.ty == ColumnType::Text)
        .then_some(column.target.as_deref())
        .flatten()
}

// =============================================================================
// Write Statements
// =============================================================================

/// `INSERT` of the id plus every persisted column.
///
/// # Errors
/// Returns `Query` when a value does not fit its column.
pub fn insert(
    dialect: Dialect,
    table: &TableDef,
    id: &str,
    record: &Record,
) -> BackendResult<Statement> {
    let mut params = Params::new(dialect);
    let mut names = vec![quote(ID_COLUMN)];
    let mut values = vec![params.push(SqlParam::Text(id.to_string()))];

    for column in &table.columns {
        names.push(quote(&column.name));
        values.push(params.push(write_param(column, record.val(&column.name))?));
    }
    if table.keywords {
        names.push(quote(PROPERTY_KEYWORDS));
        values.push(params.push(keywords_param(record)));
    }

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(&table.name),
        names.join(", "),
        values.join(", ")
    );
    Ok(params.into_statement(sql))
}

/// `UPDATE` of changed columns only, `None` when nothing changed.
///
/// # Errors
/// Returns `Query` when a value does not fit its column.
pub fn update(
    dialect: Dialect,
    table: &TableDef,
    id: &str,
    record: &Record,
) -> BackendResult<Option<Statement>> {
    let mut params = Params::new(dialect);
    let mut assignments = Vec::new();

    for column in table.columns.iter().filter(|c| record.has_changed(&c.name)) {
        let placeholder = params.push(write_param(column, record.val(&column.name))?);
        assignments.push(format!("{} = {placeholder}", quote(&column.name)));
    }
    if table.keywords && record.keywords().is_some() {
        let placeholder = params.push(keywords_param(record));
        assignments.push(format!("{} = {placeholder}", quote(PROPERTY_KEYWORDS)));
    }
    if assignments.is_empty() {
        return Ok(None);
    }

    let id_placeholder = params.push(SqlParam::Text(id.to_string()));
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = {id_placeholder}",
        quote(&table.name),
        assignments.join(", "),
        quote(ID_COLUMN)
    );
    Ok(Some(params.into_statement(sql)))
}

/// `DELETE` of one row.
#[must_use]
pub fn delete(dialect: Dialect, table: &str, id: &str) -> Statement {
    let mut params = Params::new(dialect);
    let placeholder = params.push(SqlParam::Text(id.to_string()));
    let sql = format!(
        "DELETE FROM {} WHERE {} = {placeholder}",
        quote(table),
        quote(ID_COLUMN)
    );
    params.into_statement(sql)
}

/// `DELETE` of at most `batch` rows.
#[must_use]
pub fn delete_batch(dialect: Dialect, table: &str, batch: usize) -> Statement {
    let mut params = Params::new(dialect);
    let placeholder = params.push(SqlParam::Integer(to_i64(batch)));
    let sql = format!(
        "DELETE FROM {table} WHERE {id} IN (SELECT {id} FROM {table} LIMIT {placeholder})",
        table = quote(table),
        id = quote(ID_COLUMN)
    );
    params.into_statement(sql)
}

fn keywords_param(record: &Record) -> SqlParam {
    record.keywords().map_or(SqlParam::Null(ColumnType::TextArray), |k| {
        SqlParam::TextArray(k.to_vec())
    })
}

/// Stored form of a property value. Native foreign keys keep the raw id.
fn write_param(column: &ColumnDef, value: &Value) -> BackendResult<SqlParam> {
    match (column.class, column.ty, value) {
        (StorageClass::Reference, ColumnType::Text, Value::Reference(r)) => {
            Ok(SqlParam::Text(r.uid().to_string()))
        }
        _ => to_param(column.ty, value),
    }
}

/// Bind a value as a column type.
fn to_param(ty: ColumnType, value: &Value) -> BackendResult<SqlParam> {
    if value.is_null() {
        return Ok(SqlParam::Null(ty));
    }

    let mismatch = || BackendError::query(format!("cannot bind {value:?} as {ty:?}"));
    match ty {
        ColumnType::Text => value.to_text().map(SqlParam::Text).ok_or_else(mismatch),
        ColumnType::Real => value.as_f64().map(SqlParam::Real).ok_or_else(mismatch),
        ColumnType::Integer => value.as_i64().map(SqlParam::Integer).ok_or_else(mismatch),
        ColumnType::Boolean => value.as_bool().map(SqlParam::Bool).ok_or_else(mismatch),
        ColumnType::Timestamp => match value {
            Value::DateTime(dt) => Ok(SqlParam::Timestamp(*dt)),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| SqlParam::Timestamp(dt.with_timezone(&Utc)))
                .map_err(|_| mismatch()),
            _ => Err(mismatch()),
        },
        ColumnType::TextArray => Ok(SqlParam::TextArray(match value {
            Value::Array(items) => items.iter().filter_map(Value::to_text).collect(),
            other => other.to_text().into_iter().collect(),
        })),
        ColumnType::Json => Ok(SqlParam::Json(value.to_json())),
    }
}

/// Bind a value compared against a joined column of unknown type.
fn infer_param(value: &Value) -> BackendResult<SqlParam> {
    Ok(match value {
        Value::Bool(b) => SqlParam::Bool(*b),
        Value::Integer(i) => SqlParam::Integer(*i),
        Value::Number(n) => SqlParam::Real(*n),
        Value::DateTime(dt) => SqlParam::Timestamp(*dt),
        Value::Reference(r) => SqlParam::Text(r.uid().to_string()),
        other => SqlParam::Text(
            other
                .to_text()
                .ok_or_else(|| BackendError::query(format!("cannot compare with {other:?}")))?,
        ),
    })
}

/// Raw identifier from an address, a `{ref}` object or a bare id.
fn reference_id(value: &Value) -> BackendResult<SqlParam> {
    let last = |path: &str| path.rsplit('/').next().unwrap_or(path).to_string();
    match value {
        Value::Reference(r) => Ok(SqlParam::Text(r.uid().to_string())),
        Value::String(s) => Ok(SqlParam::Text(last(s))),
        Value::Map(map) => map
            .get("ref")
            .and_then(Value::as_str)
            .map(|path| SqlParam::Text(last(path)))
            .ok_or_else(|| BackendError::query("reference object without ref")),
        other => Err(BackendError::query(format!(
            "cannot compare a reference with {other:?}"
        ))),
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

// =============================================================================
// Select
// =============================================================================

/// Row and count statements for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// `COUNT(*)` over the same `FROM ... WHERE ...`
    pub count: Statement,
    /// Projected, sorted and paginated rows
    pub rows: Statement,
    /// Reference columns joined and projected as `{ref, path, label}`
    pub joined: Vec<String>,
}

/// How a filtered or sorted property is addressed.
enum Target {
    /// Plain column of a known type
    Scalar { expr: String, ty: ColumnType },
    /// Array column; keywords compare lower-cased
    Array { expr: String, lowercase: bool },
    /// Expression yielding a referenced row's raw id
    Reference { expr: String },
    /// Column of a joined table, typed by the compared value
    Joined { expr: String },
}

impl Target {
    fn expr(&self) -> &str {
        match self {
            Self::Scalar { expr, .. }
            | Self::Array { expr, .. }
            | Self::Reference { expr }
            | Self::Joined { expr } => expr,
        }
    }
}

/// Translate one query against one table.
pub struct SelectBuilder<'a> {
    dialect: Dialect,
    table: &'a TableDef,
    template: &'a Record,
    catalog: &'a Catalog,
}

impl<'a> SelectBuilder<'a> {
    /// Create a builder. The catalog decides which references are joined.
    #[must_use]
    pub fn new(
        dialect: Dialect,
        table: &'a TableDef,
        template: &'a Record,
        catalog: &'a Catalog,
    ) -> Self {
        Self {
            dialect,
            table,
            template,
            catalog,
        }
    }

    /// Statements for a single row by id.
    ///
    /// # Errors
    /// Returns `Query` if the statement cannot be built.
    pub fn by_id(&self, id: &str) -> BackendResult<Select> {
        let filters = Filters::new().and(Filter::equals(PROPERTY_UID, id));
        let pagination = SortAndLimit {
            sortings: Vec::new(),
            limits: Limits::new(0, 1),
        };
        self.build(&filters, &pagination, &Scope::Collection)
    }

    /// Statements for filters, pagination and scope.
    ///
    /// # Errors
    /// Returns `Query` for filters the dialect cannot express.
    pub fn build(
        &self,
        filters: &Filters,
        pagination: &SortAndLimit,
        scope: &Scope,
    ) -> BackendResult<Select> {
        let (projection, from, joined) = self.from_clause();
        let mut params = Params::new(self.dialect);

        let mut conditions = Vec::with_capacity(filters.len() + 1);
        if let Some(parent) = scope.parent() {
            conditions.push(self.parent_condition(parent, &mut params)?);
        }
        for filter in filters {
            conditions.push(self.condition(filter, &joined, &mut params)?);
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        // Counting happens before sorting and pagination are appended
        let count = Statement {
            sql: format!("SELECT COUNT(*) FROM {from}{where_clause}"),
            params: params.values().to_vec(),
        };

        let mut sql = format!("SELECT {projection} FROM {from}{where_clause}");
        if !pagination.sortings.is_empty() {
            let keys = pagination
                .sortings
                .iter()
                .map(|s| {
                    let direction = match s.order {
                        SortOrder::Asc => "ASC",
                        SortOrder::Desc => "DESC",
                    };
                    Ok(format!("{} {direction}", self.target(&s.prop, &joined)?.expr()))
                })
                .collect::<BackendResult<Vec<_>>>()?;
            sql.push_str(&format!(" ORDER BY {}", keys.join(", ")));
        }

        let Limits { offset, batch } = pagination.limits;
        match batch {
            Some(batch) => {
                let placeholder = params.push(SqlParam::Integer(to_i64(batch)));
                sql.push_str(&format!(" LIMIT {placeholder}"));
            }
            // OFFSET alone is a syntax error in SQLite
            None if offset > 0 && self.dialect == Dialect::Sqlite => sql.push_str(" LIMIT -1"),
            None => {}
        }
        if offset > 0 {
            let placeholder = params.push(SqlParam::Integer(to_i64(offset)));
            sql.push_str(&format!(" OFFSET {placeholder}"));
        }

        Ok(Select {
            count,
            rows: params.into_statement(sql),
            joined,
        })
    }

    /// Projection, `FROM` with one `LEFT JOIN` per resolvable reference, and
    /// the joined property names.
    fn from_clause(&self) -> (String, String, Vec<String>) {
        let mut projection = vec![format!("{MAIN_ALIAS}.*")];
        let mut from = format!("{} AS {MAIN_ALIAS}", quote(&self.table.name));
        let mut joined = Vec::new();

        for column in &self.table.columns {
            if column.class != StorageClass::Reference {
                continue;
            }
            let Some(target) = column.target.as_deref() else {
                continue;
            };
            let Some(target_columns) = self.catalog.get(target) else {
                tracing::warn!(
                    table = %self.table.name,
                    property = %column.name,
                    target,
                    "reference target table unknown, join skipped"
                );
                continue;
            };

            let alias = quote(&column.name);
            let id = format!("{alias}.{}", quote(ID_COLUMN));
            let raw = self.reference_expr(column);
            from.push_str(&format!(
                " LEFT JOIN {} AS {alias} ON {id} = {raw}",
                quote(target)
            ));

            let label = if target_columns.contains(PROPERTY_NAME) {
                format!("COALESCE(CAST({alias}.{} AS TEXT), {id})", quote(PROPERTY_NAME))
            } else {
                id.clone()
            };
            let path = format!("'{target}/' || {id}");
            projection.push(format!(
                "CASE WHEN {id} IS NULL THEN NULL ELSE {object}('ref', {path}, 'path', {path}, 'label', {label}) END AS {projected}",
                object = self.dialect.json_object_fn(),
                projected = quote(&format!("{}{REF_PROJECTION_SUFFIX}", column.name)),
            ));
            joined.push(column.name.clone());
        }

        (projection.join(", "), from, joined)
    }

    /// Raw referenced id of a reference column of the main table.
    fn reference_expr(&self, column: &ColumnDef) -> String {
        let expr = format!("{MAIN_ALIAS}.{}", quote(&column.name));
        if column.ty == ColumnType::Text {
            expr
        } else {
            self.dialect.ref_id_expr(&expr)
        }
    }

    fn target(&self, prop: &str, joined: &[String]) -> BackendResult<Target> {
        if prop == PROPERTY_UID {
            return Ok(Target::Reference {
                expr: format!("{MAIN_ALIAS}.{}", quote(ID_COLUMN)),
            });
        }
        if prop == PROPERTY_KEYWORDS {
            if !self.table.keywords {
                return Err(BackendError::query("table has no keywords column"));
            }
            return Ok(Target::Array {
                expr: format!("{MAIN_ALIAS}.{}", quote(PROPERTY_KEYWORDS)),
                lowercase: true,
            });
        }
        if let Some((head, tail)) = prop.split_once('.') {
            if !joined.iter().any(|j| j == head) {
                return Err(BackendError::query(format!(
                    "{prop}: reference {head} is not joined"
                )));
            }
            return Ok(Target::Joined {
                expr: format!("{}.{}", quote(head), quote(check_identifier(tail)?)),
            });
        }

        let column = self.table.column(prop).ok_or_else(|| {
            BackendError::query(format!("{prop} is not a stored column of {}", self.table.name))
        })?;
        let expr = format!("{MAIN_ALIAS}.{}", quote(&column.name));
        Ok(match (column.class, column.ty) {
            (StorageClass::Reference, _) => Target::Reference {
                expr: self.reference_expr(column),
            },
            (_, ColumnType::TextArray) => Target::Array {
                expr,
                lowercase: false,
            },
            (_, ty) => Target::Scalar { expr, ty },
        })
    }

    fn parent_condition(&self, parent: &ObjectUri, params: &mut Params) -> BackendResult<String> {
        let schema = self.template.schema();
        let column = schema
            .parent_property()
            .and_then(|p| self.table.column(p))
            .ok_or_else(|| {
                BackendError::query(format!("{} has no parent property", schema.name()))
            })?;
        let uid = parent
            .uid()
            .ok_or_else(|| BackendError::query("parent scope without identifier"))?;
        let placeholder = params.push(SqlParam::Text(uid.to_string()));
        Ok(format!("{} = {placeholder}", self.reference_expr(column)))
    }

    fn condition(
        &self,
        filter: &Filter,
        joined: &[String],
        params: &mut Params,
    ) -> BackendResult<String> {
        let target = self.target(&filter.prop, joined)?;
        let expr = target.expr();
        let value = &filter.value;

        match filter.operator {
            Operator::IsNull => return Ok(format!("{expr} IS NULL")),
            Operator::IsNotNull => return Ok(format!("{expr} IS NOT NULL")),
            Operator::Equals if value.is_null() => return Ok(format!("{expr} IS NULL")),
            Operator::NotEquals if value.is_null() => return Ok(format!("{expr} IS NOT NULL")),
            _ => {}
        }

        match &target {
            Target::Array { expr, lowercase } => {
                let lowercase = *lowercase;
                let element = |v: &Value| -> BackendResult<SqlParam> {
                    let text = v
                        .to_text()
                        .ok_or_else(|| BackendError::query(format!("cannot compare {v:?}")))?;
                    Ok(SqlParam::Text(if lowercase { text.to_lowercase() } else { text }))
                };
                self.array_condition(expr, filter, &element, params)
            }
            Target::Scalar { expr, ty } => {
                let ty = *ty;
                let textual = matches!(
                    filter.operator,
                    Operator::Like | Operator::Contains | Operator::NotContains
                );
                if textual && ty != ColumnType::Text {
                    return Err(BackendError::query(format!(
                        "operator {} needs a text column, {} is {ty:?}",
                        filter.operator, filter.prop
                    )));
                }
                let property = self.template.schema().property(&filter.prop);
                let bind = |v: &Value| -> BackendResult<SqlParam> {
                    match property {
                        Some(property) if !textual => {
                            let coerced = property
                                .coerce(v.clone())
                                .map_err(|e| BackendError::query(e.to_string()))?;
                            to_param(ty, &coerced)
                        }
                        _ => to_param(ty, v),
                    }
                };
                self.scalar_condition(expr, filter, &bind, params)
            }
            Target::Reference { expr } => {
                self.scalar_condition(expr, filter, &reference_id, params)
            }
            Target::Joined { expr } => self.scalar_condition(expr, filter, &infer_param, params),
        }
    }

    fn scalar_condition(
        &self,
        expr: &str,
        filter: &Filter,
        bind: &dyn Fn(&Value) -> BackendResult<SqlParam>,
        params: &mut Params,
    ) -> BackendResult<String> {
        let value = &filter.value;
        let list = value.as_array();
        let one = |params: &mut Params| bind(value).map(|p| params.push(p));

        Ok(match filter.operator {
            Operator::Equals | Operator::ContainsAny if list.is_some() => {
                self.in_list(expr, list.unwrap_or_default(), bind, false, params)?
            }
            Operator::NotEquals if list.is_some() => {
                self.in_list(expr, list.unwrap_or_default(), bind, true, params)?
            }
            Operator::Equals | Operator::ContainsAny => format!("{expr} = {}", one(params)?),
            Operator::NotEquals => format!("{expr} <> {}", one(params)?),
            Operator::Greater => format!("{expr} > {}", one(params)?),
            Operator::GreaterOrEquals => format!("{expr} >= {}", one(params)?),
            Operator::Lower => format!("{expr} < {}", one(params)?),
            Operator::LowerOrEquals => format!("{expr} <= {}", one(params)?),
            Operator::Like => format!("{expr} {} {}", self.dialect.like_op(), one(params)?),
            Operator::Contains => format!("{expr} LIKE '%' || {} || '%'", one(params)?),
            Operator::NotContains => {
                let placeholder = one(params)?;
                format!("({expr} IS NULL OR {expr} NOT LIKE '%' || {placeholder} || '%')")
            }
            Operator::ContainsAll | Operator::IsNull | Operator::IsNotNull => {
                return Err(BackendError::query(format!(
                    "operator {} is not supported on scalar {}",
                    filter.operator, filter.prop
                )));
            }
        })
    }

    /// `expr IN (...)`, or `= ANY(array)` on Postgres.
    fn in_list(
        &self,
        expr: &str,
        items: &[Value],
        bind: &dyn Fn(&Value) -> BackendResult<SqlParam>,
        negated: bool,
        params: &mut Params,
    ) -> BackendResult<String> {
        if items.is_empty() {
            return Ok(if negated { "1 = 1" } else { "1 = 0" }.to_string());
        }
        let bound = items.iter().map(bind).collect::<BackendResult<Vec<_>>>()?;

        Ok(match self.dialect {
            Dialect::Postgres => {
                let placeholder = params.push(array_param(bound)?);
                if negated {
                    format!("NOT ({expr} = ANY({placeholder}))")
                } else {
                    format!("{expr} = ANY({placeholder})")
                }
            }
            Dialect::Sqlite => {
                let placeholders: Vec<String> = bound.into_iter().map(|p| params.push(p)).collect();
                let not = if negated { "NOT " } else { "" };
                format!("{expr} {not}IN ({})", placeholders.join(", "))
            }
        })
    }

    fn array_condition(
        &self,
        expr: &str,
        filter: &Filter,
        element: &dyn Fn(&Value) -> BackendResult<SqlParam>,
        params: &mut Params,
    ) -> BackendResult<String> {
        let items: Vec<SqlParam> = match &filter.value {
            Value::Array(values) => values.iter().map(element).collect::<BackendResult<_>>()?,
            other => vec![element(other)?],
        };

        enum Membership {
            Any,
            All,
            None,
        }
        let membership = match filter.operator {
            Operator::Equals | Operator::Contains | Operator::ContainsAny => Membership::Any,
            Operator::ContainsAll => Membership::All,
            Operator::NotEquals | Operator::NotContains => Membership::None,
            other => {
                return Err(BackendError::query(format!(
                    "operator {other} is not supported on array {}",
                    filter.prop
                )));
            }
        };

        if items.is_empty() {
            return Ok(match membership {
                Membership::Any => "1 = 0",
                Membership::All | Membership::None => "1 = 1",
            }
            .to_string());
        }

        Ok(match self.dialect {
            Dialect::Postgres => {
                let texts = items
                    .into_iter()
                    .filter_map(|p| match p {
                        SqlParam::Text(t) => Some(t),
                        _ => None,
                    })
                    .collect();
                let placeholder = params.push(SqlParam::TextArray(texts));
                match membership {
                    Membership::Any => format!("{expr} && {placeholder}"),
                    Membership::All => format!("{expr} @> {placeholder}"),
                    Membership::None => format!("NOT (COALESCE({expr}, '{{}}') && {placeholder})"),
                }
            }
            Dialect::Sqlite => {
                let exists = |placeholders: Vec<String>| {
                    format!(
                        "EXISTS (SELECT 1 FROM json_each({expr}) WHERE json_each.value IN ({}))",
                        placeholders.join(", ")
                    )
                };
                match membership {
                    Membership::Any => exists(items.into_iter().map(|p| params.push(p)).collect()),
                    Membership::None => format!(
                        "NOT {}",
                        exists(items.into_iter().map(|p| params.push(p)).collect())
                    ),
                    Membership::All => items
                        .into_iter()
                        .map(|p| exists(vec![params.push(p)]))
                        .collect::<Vec<_>>()
                        .join(" AND "),
                }
            }
        })
    }
}

/// Typed array parameter for `= ANY(...)`.
fn array_param(items: Vec<SqlParam>) -> BackendResult<SqlParam> {
    let mixed = || BackendError::query("list values must share one type");
    match items.first() {
        Some(SqlParam::Real(_)) => items
            .into_iter()
            .map(|p| match p {
                SqlParam::Real(n) => Ok(n),
                _ => Err(mixed()),
            })
            .collect::<BackendResult<_>>()
            .map(SqlParam::RealArray),
        Some(SqlParam::Integer(_)) => items
            .into_iter()
            .map(|p| match p {
                SqlParam::Integer(n) => Ok(n),
                _ => Err(mixed()),
            })
            .collect::<BackendResult<_>>()
            .map(SqlParam::IntegerArray),
        _ => items
            .into_iter()
            .map(|p| match p {
                SqlParam::Text(t) => Ok(t),
                _ => Err(mixed()),
            })
            .collect::<BackendResult<_>>()
            .map(SqlParam::TextArray),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::middleware::KeywordsMiddleware;
    use polystore_core::{RefTarget, Sorting};

    fn schema() -> std::sync::Arc<ModelSchema> {
        ModelSchema::builder("User")
            .with_base_properties()
            .string("lastname")
            .integer("age")
            .array("tags")
            .reference("entity", RefTarget::model("Entity").with_collection("entity"))
            .build()
            .unwrap()
    }

    fn table(core: &AdapterCore) -> TableDef {
        TableDef::for_schema(core, &schema()).unwrap()
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.insert(
            "entity".to_string(),
            ["id", "name"].iter().map(|s| (*s).to_string()).collect(),
        );
        catalog
    }

    fn build(dialect: Dialect, filters: Filters, pagination: SortAndLimit) -> Select {
        let core = AdapterCore::new(AdapterConfig::default()).unwrap();
        let table = table(&core);
        let template = Record::new(schema());
        let catalog = catalog();
        SelectBuilder::new(dialect, &table, &template, &catalog)
            .build(&filters, &pagination, &Scope::Collection)
            .unwrap()
    }

    #[test]
    fn test_table_definition() {
        let core = AdapterCore::new(AdapterConfig::default()).unwrap();
        let table = table(&core);
        assert_eq!(table.name, "user");
        assert_eq!(table.column("entity").unwrap().ty, ColumnType::Json);
        assert_eq!(table.column("tags").unwrap().ty, ColumnType::TextArray);
        assert!(!table.keywords);

        let create = create_table(Dialect::Postgres, &table, &Catalog::new());
        assert!(create.sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "user" ("id" TEXT PRIMARY KEY"#));
        assert!(create.sql.contains(r#""age" BIGINT"#));
    }

    #[test]
    fn test_native_foreign_keys() {
        let config = AdapterConfig::default().with_native_foreign_keys(true);
        let mut core = AdapterCore::new(config).unwrap();
        core.add_middleware(KeywordsMiddleware::new()).unwrap();

        let table = table(&core);
        assert_eq!(table.column("entity").unwrap().ty, ColumnType::Text);
        assert!(table.keywords);

        let create = create_table(Dialect::Sqlite, &table, &catalog());
        assert!(create
            .sql
            .contains(r#""entity" TEXT REFERENCES "entity"("id") ON DELETE SET NULL"#));
        assert!(create.sql.contains(r#""keywords" TEXT"#));
    }

    #[test]
    fn test_add_missing_columns_only() {
        let core = AdapterCore::new(AdapterConfig::default()).unwrap();
        let table = table(&core);
        let existing: BTreeSet<String> = table
            .column_names()
            .filter(|c| *c != "age")
            .map(str::to_string)
            .collect();

        let statements = add_columns(Dialect::Sqlite, &table, &existing);
        assert_eq!(statements.len(), 1);
        assert_eq!(statements[0].sql, r#"ALTER TABLE "user" ADD COLUMN "age" INTEGER"#);
    }

    #[test]
    fn test_count_reuses_where_before_pagination() {
        let select = build(
            Dialect::Postgres,
            Filters::new().and(Filter::equals("lastname", "Doe")),
            SortAndLimit {
                sortings: vec![Sorting::new("age", SortOrder::Desc)],
                limits: Limits::new(5, 10),
            },
        );

        assert!(select.count.sql.starts_with("SELECT COUNT(*) FROM \"user\" AS coll"));
        assert!(select.count.sql.ends_with(r#"WHERE coll."lastname" = $1"#));
        assert_eq!(select.count.params, vec![SqlParam::Text("Doe".into())]);

        assert!(select
            .rows
            .sql
            .ends_with(r#"ORDER BY coll."age" DESC LIMIT $2 OFFSET $3"#));
        assert_eq!(select.rows.params.len(), 3);
        assert_eq!(select.joined, vec!["entity".to_string()]);
    }

    #[test]
    fn test_unlimited_batch_omits_limit() {
        let pg = build(
            Dialect::Postgres,
            Filters::new(),
            SortAndLimit {
                sortings: Vec::new(),
                limits: Limits::new(0, -1),
            },
        );
        assert!(!pg.rows.sql.contains("LIMIT"));

        let lite = build(
            Dialect::Sqlite,
            Filters::new(),
            SortAndLimit {
                sortings: Vec::new(),
                limits: Limits::new(3, -1),
            },
        );
        assert!(lite.rows.sql.ends_with("LIMIT -1 OFFSET ?"));
    }

    #[test]
    fn test_lower_or_equals_is_le() {
        for dialect in [Dialect::Postgres, Dialect::Sqlite] {
            let select = build(
                dialect,
                Filters::new().and(Filter::new("age", Operator::LowerOrEquals, 30)),
                SortAndLimit::default(),
            );
            assert!(select.count.sql.contains(r#"coll."age" <= "#), "{dialect:?}");
            assert!(!select.count.sql.contains(r#"coll."age" > "#), "{dialect:?}");
        }
    }

    fn build_err(filter: Filter) -> BackendError {
        let core = AdapterCore::new(AdapterConfig::default()).unwrap();
        let table = table(&core);
        let template = Record::new(schema());
        let catalog = catalog();
        SelectBuilder::new(Dialect::Postgres, &table, &template, &catalog)
            .build(&Filters::new().and(filter), &SortAndLimit::default(), &Scope::Collection)
            .unwrap_err()
    }

    #[test]
    fn test_filter_values_take_the_column_type() {
        let select = build(
            Dialect::Postgres,
            Filters::new().and(Filter::new("age", Operator::GreaterOrEquals, 3.0)),
            SortAndLimit::default(),
        );
        assert_eq!(select.count.params, vec![SqlParam::Integer(3)]);

        let select = build(
            Dialect::Postgres,
            Filters::new().and(Filter::equals("age", vec![Value::Number(20.0), Value::Integer(30)])),
            SortAndLimit::default(),
        );
        assert_eq!(select.count.params, vec![SqlParam::IntegerArray(vec![20, 30])]);

        let err = build_err(Filter::new("age", Operator::Greater, 3.5));
        assert!(matches!(err, BackendError::Query { .. }));
    }

    #[test]
    fn test_text_operators_need_a_text_column() {
        for op in [Operator::Contains, Operator::NotContains, Operator::Like] {
            let err = build_err(Filter::new("age", op, "3"));
            assert!(matches!(err, BackendError::Query { .. }), "{op}");
        }

        let select = build(
            Dialect::Postgres,
            Filters::new().and(Filter::new("lastname", Operator::Contains, "oe")),
            SortAndLimit::default(),
        );
        assert!(select.count.sql.contains("LIKE '%' || $1 || '%'"));
    }

    #[test]
    fn test_null_equality_becomes_is_null() {
        let select = build(
            Dialect::Postgres,
            Filters::new().and(Filter::equals("lastname", Value::Null)),
            SortAndLimit::default(),
        );
        assert!(select.count.sql.ends_with(r#"coll."lastname" IS NULL"#));
        assert!(select.count.params.is_empty());
    }

    #[test]
    fn test_reference_filter_normalises_to_id() {
        for value in [
            Value::from("e1"),
            Value::from("entity/e1"),
            Value::from(&ObjectUri::build("entity", "e1").unwrap()),
        ] {
            let select = build(
                Dialect::Postgres,
                Filters::new().and(Filter::equals("entity", value)),
                SortAndLimit::default(),
            );
            assert!(select.count.sql.contains("regexp_replace"));
            assert_eq!(select.count.params, vec![SqlParam::Text("e1".into())]);
        }
    }

    #[test]
    fn test_array_filters_per_dialect() {
        let filters = || {
            Filters::new()
                .and(Filter::new("tags", Operator::ContainsAll, vec!["a", "b"]))
                .and(Filter::equals("tags", vec!["c", "d"]))
        };

        let pg = build(Dialect::Postgres, filters(), SortAndLimit::default());
        assert!(pg.count.sql.contains(r#"coll."tags" @> $1"#));
        assert!(pg.count.sql.contains(r#"coll."tags" && $2"#));

        let lite = build(Dialect::Sqlite, filters(), SortAndLimit::default());
        assert_eq!(lite.count.sql.matches("json_each").count(), 3);
        assert_eq!(lite.count.params.len(), 4);
    }

    #[test]
    fn test_scalar_list_equality() {
        let filters = Filters::new().and(Filter::equals("lastname", vec!["Doe", "Roe"]));
        let pg = build(Dialect::Postgres, filters.clone(), SortAndLimit::default());
        assert!(pg.count.sql.contains(r#"coll."lastname" = ANY($1)"#));

        let lite = build(Dialect::Sqlite, filters, SortAndLimit::default());
        assert!(lite.count.sql.contains(r#"coll."lastname" IN (?, ?)"#));
    }

    #[test]
    fn test_join_projects_reference_object() {
        let select = build(Dialect::Sqlite, Filters::new(), SortAndLimit::default());
        assert!(select.rows.sql.contains(r#"LEFT JOIN "entity" AS "entity""#));
        assert!(select.rows.sql.contains("json_object('ref', 'entity/' ||"));
        assert!(select.rows.sql.contains(r#"AS "entity__ref""#));

        let filters = Filters::new().and(Filter::equals("entity.name", "Acme"));
        let select = build(Dialect::Postgres, filters, SortAndLimit::default());
        assert!(select.count.sql.contains(r#""entity"."name" = $1"#));
    }

    #[test]
    fn test_unknown_target_skips_join() {
        let core = AdapterCore::new(AdapterConfig::default()).unwrap();
        let table = table(&core);
        let template = Record::new(schema());
        let empty = Catalog::new();
        let select = SelectBuilder::new(Dialect::Sqlite, &table, &template, &empty)
            .build(&Filters::new(), &SortAndLimit::default(), &Scope::Collection)
            .unwrap();
        assert!(!select.rows.sql.contains("JOIN"));
        assert!(select.joined.is_empty());
    }

    #[test]
    fn test_update_writes_changed_columns() {
        let core = AdapterCore::new(AdapterConfig::default()).unwrap();
        let table = table(&core);
        let mut record = Record::new(schema());
        assert!(update(Dialect::Postgres, &table, "u1", &record)
            .unwrap()
            .is_none());

        record.set("lastname", "Doe").unwrap();
        let statement = update(Dialect::Postgres, &table, "u1", &record)
            .unwrap()
            .unwrap();
        assert_eq!(
            statement.sql,
            r#"UPDATE "user" SET "lastname" = $1 WHERE "id" = $2"#
        );
    }
}
