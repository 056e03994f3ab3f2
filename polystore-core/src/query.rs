//! Query Algebra
//!
//! TigerStyle: A backend-agnostic description of what to fetch. Adapters
//! translate it; nothing here knows about SQL or documents.
//!
//! ```
//! use polystore_core::{ModelSchema, Operator, Query, SortOrder};
//!
//! let schema = ModelSchema::builder("User").string("lastname").build().unwrap();
//! let query = Query::new(schema)
//!     .where_eq("lastname", "Doe")
//!     .sort_by("lastname", SortOrder::Asc)
//!     .batch(10);
//!
//! assert_eq!(query.filters().len(), 1);
//! assert_eq!(query.filters().iter().next().unwrap().operator, Operator::Equals);
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{
    BATCH_UNLIMITED, LIMITS_BATCH_COUNT_DEFAULT, LIMITS_OFFSET_DEFAULT, QUERY_FILTERS_COUNT_MAX,
};
use crate::error::{CoreError, CoreResult};
use crate::model::ModelSchema;
use crate::record::Record;
use crate::uri::ObjectUri;
use crate::value::Value;

// =============================================================================
// Operator
// =============================================================================

/// Comparison operators understood by every adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`; an array value means "any of"
    Equals,
    /// `<>`
    NotEquals,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEquals,
    /// `<`
    Lower,
    /// `<=`
    LowerOrEquals,
    /// Array holds the value (substring for text)
    Contains,
    /// Negation of `Contains`
    NotContains,
    /// Array holds every listed value
    ContainsAll,
    /// Array holds at least one listed value
    ContainsAny,
    /// SQL-style pattern with `%` wildcards
    Like,
    /// Value is absent
    IsNull,
    /// Value is present
    IsNotNull,
}

impl Operator {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::Greater => "greater",
            Self::GreaterOrEquals => "greaterOrEquals",
            Self::Lower => "lower",
            Self::LowerOrEquals => "lowerOrEquals",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::ContainsAll => "containsAll",
            Self::ContainsAny => "containsAny",
            Self::Like => "like",
            Self::IsNull => "isNull",
            Self::IsNotNull => "isNotNull",
        }
    }

    /// All operators in declaration order.
    #[must_use]
    pub fn all() -> &'static [Operator] {
        &[
            Self::Equals,
            Self::NotEquals,
            Self::Greater,
            Self::GreaterOrEquals,
            Self::Lower,
            Self::LowerOrEquals,
            Self::Contains,
            Self::NotContains,
            Self::ContainsAll,
            Self::ContainsAny,
            Self::Like,
            Self::IsNull,
            Self::IsNotNull,
        ]
    }

    /// Whether the operator ignores its value.
    #[must_use]
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CoreError::invalid_query(format!("unknown operator '{s}'")))
    }
}

// =============================================================================
// Filter / Filters
// =============================================================================

/// One predicate `{prop, operator, value}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Property path
    pub prop: String,
    /// Comparison operator
    pub operator: Operator,
    /// Compared value
    pub value: Value,
}

impl Filter {
    /// Create a filter.
    #[must_use]
    pub fn new(prop: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            prop: prop.into(),
            operator,
            value: value.into(),
        }
    }

    /// Equality filter.
    #[must_use]
    pub fn equals(prop: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(prop, Operator::Equals, value)
    }
}

/// Ordered list of filters, combined with AND in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<Filter>);

impl Filters {
    /// Empty filter list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter.
    #[must_use]
    pub fn and(mut self, filter: Filter) -> Self {
        self.0.push(filter);
        self
    }

    /// Append a filter in place.
    pub fn push(&mut self, filter: Filter) {
        self.0.push(filter);
    }

    /// Number of filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Filter> {
        self.0.iter()
    }

    /// Check every filter property against a schema.
    ///
    /// # Errors
    /// Returns `UnknownProperty` for the first unknown path, or
    /// `InvalidQuery` when the filter count exceeds the limit.
    pub fn check(&self, schema: &ModelSchema) -> CoreResult<()> {
        if self.0.len() > QUERY_FILTERS_COUNT_MAX {
            return Err(CoreError::invalid_query(format!(
                "{} filters exceed the limit of {QUERY_FILTERS_COUNT_MAX}",
                self.0.len()
            )));
        }
        self.0
            .iter()
            .try_for_each(|f| schema.check_property_path(&f.prop))
    }
}

impl From<Vec<Filter>> for Filters {
    fn from(filters: Vec<Filter>) -> Self {
        Self(filters)
    }
}

impl<'a> IntoIterator for &'a Filters {
    type Item = &'a Filter;
    type IntoIter = std::slice::Iter<'a, Filter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// =============================================================================
// Sorting / Limits
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl SortOrder {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sorting {
    /// Property path
    pub prop: String,
    /// Direction
    pub order: SortOrder,
}

impl Sorting {
    /// Create a sort key.
    #[must_use]
    pub fn new(prop: impl Into<String>, order: SortOrder) -> Self {
        Self {
            prop: prop.into(),
            order,
        }
    }
}

/// Offset and page size. `batch == None` means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Rows to skip
    pub offset: usize,
    /// Page size
    pub batch: Option<usize>,
}

impl Limits {
    /// Create limits from the wire form, where `-1` means no limit.
    #[must_use]
    pub fn new(offset: usize, batch: i64) -> Self {
        Self {
            offset,
            batch: usize::try_from(batch).ok(),
        }
    }

    /// No limit, starting at the first row.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            offset: 0,
            batch: None,
        }
    }

    /// Wire form of the batch, `-1` when unlimited.
    #[must_use]
    pub fn batch_literal(&self) -> i64 {
        self.batch
            .and_then(|b| i64::try_from(b).ok())
            .unwrap_or(BATCH_UNLIMITED)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            offset: LIMITS_OFFSET_DEFAULT,
            batch: Some(LIMITS_BATCH_COUNT_DEFAULT),
        }
    }
}

/// Sort keys plus limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortAndLimit {
    /// Sort keys, most significant first
    pub sortings: Vec<Sorting>,
    /// Offset and batch
    pub limits: Limits,
}

impl SortAndLimit {
    /// Check every sort property against a schema.
    ///
    /// # Errors
    /// Returns `UnknownProperty` for the first unknown path.
    pub fn check(&self, schema: &ModelSchema) -> CoreResult<()> {
        self.sortings
            .iter()
            .try_for_each(|s| schema.check_property_path(&s.prop))
    }

    /// First sort key, reported in query metadata.
    #[must_use]
    pub fn sort_field(&self) -> Option<String> {
        self.sortings.first().map(|s| s.prop.clone())
    }
}

// =============================================================================
// Query
// =============================================================================

/// A request against a model: filters, sort keys, limits and parent scope.
#[derive(Debug, Clone)]
pub struct Query {
    schema: Arc<ModelSchema>,
    parent: Option<ObjectUri>,
    filters: Filters,
    pagination: SortAndLimit,
    across_nesting: bool,
}

impl Query {
    /// Query all records of a model.
    #[must_use]
    pub fn new(schema: Arc<ModelSchema>) -> Self {
        Self {
            schema,
            parent: None,
            filters: Filters::new(),
            pagination: SortAndLimit::default(),
            across_nesting: false,
        }
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an equality filter.
    #[must_use]
    pub fn where_eq(self, prop: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::equals(prop, value))
    }

    /// Add a sort key.
    #[must_use]
    pub fn sort_by(mut self, prop: &str, order: SortOrder) -> Self {
        self.pagination.sortings.push(Sorting::new(prop, order));
        self
    }

    /// Rows to skip.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.pagination.limits.offset = offset;
        self
    }

    /// Page size; `-1` for no limit.
    #[must_use]
    pub fn batch(mut self, batch: i64) -> Self {
        self.pagination.limits.batch = usize::try_from(batch).ok();
        self
    }

    /// Restrict to records nested under a parent.
    #[must_use]
    pub fn parent(mut self, parent: ObjectUri) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Match the collection at any nesting depth.
    #[must_use]
    pub fn across_nesting(mut self) -> Self {
        self.across_nesting = true;
        self
    }

    /// Model being queried.
    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Parent scope.
    #[must_use]
    pub fn parent_scope(&self) -> Option<&ObjectUri> {
        self.parent.as_ref()
    }

    /// Filters in declaration order.
    #[must_use]
    pub fn filters(&self) -> &Filters {
        &self.filters
    }

    /// Sort keys and limits.
    #[must_use]
    pub fn pagination(&self) -> &SortAndLimit {
        &self.pagination
    }

    /// Whether the query spans every nesting depth.
    #[must_use]
    pub fn is_across_nesting(&self) -> bool {
        self.across_nesting
    }

    /// Template record results are cloned from.
    #[must_use]
    pub fn template(&self) -> Record {
        Record::new(Arc::clone(&self.schema))
    }
}

// =============================================================================
// Results
// =============================================================================

/// Metadata returned with query results.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMeta {
    /// Filtered total, independent of pagination
    pub count: u64,
    /// Offset applied
    pub offset: usize,
    /// Batch applied, `-1` when unlimited
    pub batch: i64,
    /// Wall time spent in the backend
    pub execution_time: Duration,
    /// First sort key
    pub sort_field: Option<String>,
    /// Native query text, when the adapter runs in debug mode
    pub debug: Option<String>,
}

/// Items plus metadata.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Rehydrated records
    pub items: Vec<Record>,
    /// Query metadata
    pub meta: QueryMeta,
}
