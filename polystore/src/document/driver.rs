//! Document Store Driver
//!
//! TigerStyle: The narrow surface a schemaless document backend must
//! offer. The adapter only speaks this trait, so a hosted store and the
//! in-process simulation are interchangeable.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map as JsonMap, Value as Json};

use crate::error::BackendResult;

/// Field path matching the document's own identifier.
pub const DOCUMENT_ID_FIELD: &str = "__id__";

/// A stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Full path: `collection/id[/collection/id...]`
    pub path: String,
    /// Document fields
    pub data: JsonMap<String, Json>,
}

impl Document {
    /// Identifier, the last path segment.
    #[must_use]
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Path of the collection holding this document.
    #[must_use]
    pub fn collection_path(&self) -> &str {
        self.path.rsplit_once('/').map_or("", |(parent, _)| parent)
    }

    /// Name of the collection holding this document.
    #[must_use]
    pub fn collection_name(&self) -> &str {
        let parent = self.collection_path();
        parent.rsplit('/').next().unwrap_or(parent)
    }
}

/// Native comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocOperator {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// Array field holds the value
    ArrayContains,
    /// Array field holds one of the listed values
    ArrayContainsAny,
    /// Array field holds none of the listed values, or is absent
    ArrayNotContainsAny,
    /// Field equals one of the listed values
    In,
    /// Field equals none of the listed values
    NotIn,
}

impl DocOperator {
    /// Native symbol.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::ArrayContains => "array-contains",
            Self::ArrayContainsAny => "array-contains-any",
            Self::ArrayNotContainsAny => "array-not-contains-any",
            Self::In => "in",
            Self::NotIn => "not-in",
        }
    }
}

/// Which documents a query scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocTarget {
    /// Direct children of one collection path
    Collection(String),
    /// Every collection with this name, at any depth
    Group(String),
}

/// One native predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct DocWhere {
    /// Dotted field path
    pub field: String,
    /// Operator
    pub op: DocOperator,
    /// Compared value
    pub value: Json,
}

/// One native sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocOrder {
    /// Dotted field path
    pub field: String,
    /// Descending order
    pub descending: bool,
}

/// Native query.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentQuery {
    /// Scanned documents
    pub target: DocTarget,
    /// Predicates, all of which must hold
    pub wheres: Vec<DocWhere>,
    /// Sort keys
    pub order_by: Vec<DocOrder>,
    /// Documents to skip
    pub offset: usize,
    /// Page size, `None` for no limit
    pub limit: Option<usize>,
}

impl DocumentQuery {
    /// Scan a target with no predicates.
    #[must_use]
    pub fn new(target: DocTarget) -> Self {
        Self {
            target,
            wheres: Vec::new(),
            order_by: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Same predicates without sorting or pagination, for counting.
    #[must_use]
    pub fn unpaginated(&self) -> Self {
        Self {
            target: self.target.clone(),
            wheres: self.wheres.clone(),
            order_by: Vec::new(),
            offset: 0,
            limit: None,
        }
    }
}

impl fmt::Display for DocumentQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            DocTarget::Collection(path) => write!(f, "collection({path})")?,
            DocTarget::Group(name) => write!(f, "collectionGroup({name})")?,
        }
        for w in &self.wheres {
            write!(f, ".where({}, {}, {})", w.field, w.op.as_str(), w.value)?;
        }
        for o in &self.order_by {
            let dir = if o.descending { "desc" } else { "asc" };
            write!(f, ".orderBy({}, {dir})", o.field)?;
        }
        if self.offset > 0 {
            write!(f, ".offset({})", self.offset)?;
        }
        if let Some(limit) = self.limit {
            write!(f, ".limit({limit})")?;
        }
        Ok(())
    }
}

/// Schemaless document backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` if absent.
    async fn get(&self, path: &str) -> BackendResult<Option<Document>>;

    /// Store a new document.
    ///
    /// Fails with `AlreadyExists` if the path is taken.
    async fn create(&self, path: &str, data: JsonMap<String, Json>) -> BackendResult<()>;

    /// Merge fields into an existing document.
    ///
    /// Fails with `NotFound` if the path is free.
    async fn update(&self, path: &str, data: JsonMap<String, Json>) -> BackendResult<()>;

    /// Remove a document. Absent documents are not an error.
    async fn delete(&self, path: &str) -> BackendResult<()>;

    /// Run a query.
    async fn run_query(&self, query: &DocumentQuery) -> BackendResult<Vec<Document>>;

    /// Count matches, ignoring pagination.
    async fn count(&self, query: &DocumentQuery) -> BackendResult<u64>;

    /// Remove documents in one batch.
    async fn delete_batch(&self, paths: &[String]) -> BackendResult<()>;
}
