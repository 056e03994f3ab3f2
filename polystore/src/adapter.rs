//! Backend Adapter Contract
//!
//! TigerStyle: Abstract interface for record persistence.
//!
//! # Contract
//!
//! Every adapter implements the same five operations over typed records:
//! `create`, `read`, `update`, `delete` and `find`, plus bulk
//! `delete_collection`. `query` is a provided wrapper over `find`.
//!
//! The backend-independent half of each operation (identifier checks,
//! path construction, the middleware pipeline, filter validation and result
//! metadata) lives in [`AdapterCore`], which every adapter embeds.

use std::time::Instant;

use async_trait::async_trait;
use polystore_core::{
    Filters, ModelSchema, ObjectUri, PropertyDef, Query, QueryMeta, QueryResult, Record,
    SortAndLimit, PROPERTY_KEYWORDS, PROPERTY_STATUS, STATUS_DELETED,
};
use uuid::Uuid;

use crate::config::AdapterConfig;
use crate::error::{BackendError, BackendResult};
use crate::middleware::{Action, ActionParams, KeywordsMiddleware, Middleware, MiddlewarePipeline};

// =============================================================================
// Scope
// =============================================================================

/// Where in a hierarchy a query looks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
    /// The model's collection, resolved from configuration
    #[default]
    Collection,
    /// Records nested under this parent
    Parent(ObjectUri),
    /// The collection at every nesting depth
    AcrossNesting,
}

impl Scope {
    /// Scope of a query. A parent scope wins over `across_nesting`.
    #[must_use]
    pub fn of(query: &Query) -> Self {
        match query.parent_scope() {
            Some(parent) => Self::Parent(parent.clone()),
            None if query.is_across_nesting() => Self::AcrossNesting,
            None => Self::Collection,
        }
    }

    /// Parent address, for parent-scoped queries.
    #[must_use]
    pub fn parent(&self) -> Option<&ObjectUri> {
        match self {
            Self::Parent(parent) => Some(parent),
            _ => None,
        }
    }
}

// =============================================================================
// BackendAdapter
// =============================================================================

/// Persistence contract shared by every backend.
///
/// TigerStyle: All operations are async, return explicit errors. Records
/// are mutated in place: `create` assigns the address, `read` merges stored
/// data, hard `delete` clears the address.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Shared configuration, pipeline and helpers.
    fn core(&self) -> &AdapterCore;

    /// Registry alias of this adapter.
    fn alias(&self) -> &str {
        &self.core().config().alias
    }

    /// Persist a new record.
    ///
    /// Fails if the record already carries an address. Uses `desired_uid`
    /// when given, a generated identifier otherwise.
    async fn create(&self, record: &mut Record, desired_uid: Option<&str>) -> BackendResult<()>;

    /// Merge stored data at the record's address into the record.
    ///
    /// Fails with `NotFound` if nothing is stored there.
    async fn read(&self, record: &mut Record) -> BackendResult<()>;

    /// Persist changed properties.
    async fn update(&self, record: &mut Record) -> BackendResult<()>;

    /// Delete a record.
    ///
    /// Soft unless `hard_delete` is set or the adapter is not configured for
    /// soft delete. Hard delete clears the record's address.
    async fn delete(&self, record: &mut Record, hard_delete: bool) -> BackendResult<()>;

    /// Remove every record of a collection. Missing collections are not an
    /// error.
    async fn delete_collection(
        &self,
        collection: &str,
        batch_size: Option<usize>,
    ) -> BackendResult<()>;

    /// Run filters and pagination against the template's model.
    async fn find(
        &self,
        template: &Record,
        filters: &Filters,
        pagination: &SortAndLimit,
        scope: &Scope,
    ) -> BackendResult<QueryResult>;

    /// Resolve a query into a template and run it.
    async fn query(&self, query: &Query) -> BackendResult<QueryResult> {
        let template = query.template();
        self.find(&template, query.filters(), query.pagination(), &Scope::of(query))
            .await
    }
}

// =============================================================================
// AdapterCore
// =============================================================================

/// Backend-independent half of every adapter operation.
#[derive(Debug, Clone)]
pub struct AdapterCore {
    config: AdapterConfig,
    middlewares: MiddlewarePipeline,
}

impl AdapterCore {
    /// Create from a validated configuration.
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid.
    pub fn new(config: AdapterConfig) -> BackendResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            middlewares: MiddlewarePipeline::new(),
        })
    }

    /// Adapter configuration.
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Registered middlewares.
    #[must_use]
    pub fn middlewares(&self) -> &MiddlewarePipeline {
        &self.middlewares
    }

    /// Register a middleware.
    ///
    /// # Errors
    /// Returns `DuplicateMiddleware` for a second middleware of one type.
    pub fn add_middleware<M: Middleware>(&mut self, middleware: M) -> BackendResult<()> {
        self.middlewares.add(middleware)
    }

    /// Whether records carry a keywords index.
    #[must_use]
    pub fn keywords_enabled(&self) -> bool {
        self.middlewares.has::<KeywordsMiddleware>()
    }

    // -------------------------------------------------------------------------
    // Paths
    // -------------------------------------------------------------------------

    /// Collection of a record's model.
    ///
    /// # Errors
    /// Returns `UnresolvableCollection` for an empty collection name.
    pub fn collection<'a>(&'a self, record: &'a Record) -> BackendResult<&'a str> {
        self.collection_of(record.schema())
    }

    /// Collection of a model: configured mapping first, then the declared
    /// collection.
    ///
    /// # Errors
    /// Returns `UnresolvableCollection` for an empty collection name.
    pub fn collection_of<'a>(&'a self, schema: &'a ModelSchema) -> BackendResult<&'a str> {
        let collection = self
            .config
            .mapping
            .get(schema.name())
            .map_or(schema.collection(), String::as_str);
        if collection.is_empty() {
            return Err(BackendError::unresolvable(format!(
                "model {} declares no collection",
                schema.name()
            )));
        }
        Ok(collection)
    }

    /// Collection a reference property points at: configured mapping first,
    /// then the referenced model's declared collection.
    #[must_use]
    pub fn reference_collection(&self, property: &PropertyDef) -> Option<String> {
        property
            .reference_target()
            .and_then(|target| self.config.reference_collection(target))
    }

    /// Whether records of this collection nest under a parent record.
    #[must_use]
    pub fn is_subcollection(&self, collection: &str) -> bool {
        self.config.is_subcollection(collection)
    }

    /// Owning record of a nested record, read from its parent property.
    ///
    /// # Errors
    /// Returns `UnresolvableCollection` when the collection is declared a
    /// sub-collection but the record has no parent reference.
    pub fn parent_of(&self, record: &Record) -> BackendResult<Option<ObjectUri>> {
        let collection = self.collection(record)?;
        if !self.is_subcollection(collection) {
            return Ok(None);
        }

        let schema = record.schema();
        let parent = schema
            .parent_property()
            .and_then(|p| record.val(p).as_reference())
            .ok_or_else(|| {
                BackendError::unresolvable(format!(
                    "{collection} is a sub-collection but the {} record has no parent",
                    schema.name()
                ))
            })?;
        Ok(Some(parent.uri()?))
    }

    /// `collection/uid`, prefixed with the parent's path for sub-collections.
    ///
    /// # Errors
    /// Returns `MalformedPath` for invalid identifiers or
    /// `UnresolvableCollection` for orphaned nested records.
    pub fn build_path(&self, record: &Record, uid: &str) -> BackendResult<ObjectUri> {
        let collection = self.collection(record)?;
        let uri = ObjectUri::build(collection, uid)?;
        let uri = match self.parent_of(record)? {
            Some(parent) => uri.with_parent(parent),
            None => uri,
        };
        Ok(uri.with_backend(self.config.alias.clone()))
    }

    /// Address an operation targets, with a missing collection resolved from
    /// the model.
    ///
    /// # Errors
    /// Returns `MissingIdentifier` for unsaved records.
    pub fn target(&self, record: &Record, operation: &str) -> BackendResult<ObjectUri> {
        let uri = record.uri();
        if !uri.is_set() {
            return Err(BackendError::missing_identifier(operation));
        }
        let uri = if uri.has_missing_collection() {
            uri.clone().with_collection(self.collection(record)?)?
        } else {
            uri.clone()
        };
        Ok(match uri.backend() {
            Some(_) => uri,
            None => uri.with_backend(self.config.alias.clone()),
        })
    }

    // -------------------------------------------------------------------------
    // Write lifecycle
    // -------------------------------------------------------------------------

    /// Check, pick an identifier and run CREATE middlewares.
    ///
    /// Returns the address the record will be stored at.
    ///
    /// # Errors
    /// Returns `AlreadyPersisted` or the first middleware error.
    pub async fn before_create(
        &self,
        record: &mut Record,
        desired_uid: Option<&str>,
    ) -> BackendResult<ObjectUri> {
        if record.is_persisted() {
            return Err(BackendError::AlreadyPersisted {
                path: record.uri().path(),
            });
        }

        let uid = desired_uid.map_or_else(|| Uuid::new_v4().to_string(), str::to_string);
        self.middlewares
            .run(record, Action::Create, &ActionParams::create(desired_uid))
            .await?;

        self.build_path(record, &uid)
    }

    /// Check the identifier and run UPDATE middlewares.
    ///
    /// # Errors
    /// Returns `MissingIdentifier` or the first middleware error.
    pub async fn before_update(&self, record: &mut Record) -> BackendResult<ObjectUri> {
        let uri = self.target(record, "update")?;
        self.middlewares
            .run(record, Action::Update, &ActionParams::default())
            .await?;
        Ok(uri)
    }

    /// Check the identifier, run DELETE middlewares and, for soft deletes,
    /// flip the status.
    ///
    /// Returns the address and whether the delete is hard.
    ///
    /// # Errors
    /// Returns `MissingIdentifier`, `Config` when a soft delete targets a
    /// model without status, or the first middleware error.
    pub async fn before_delete(
        &self,
        record: &mut Record,
        hard_delete: bool,
    ) -> BackendResult<(ObjectUri, bool)> {
        let uri = self.target(record, "delete")?;
        let hard = hard_delete || !self.config.soft_delete;

        if !hard && !record.schema().has_property(PROPERTY_STATUS) {
            return Err(BackendError::config(format!(
                "soft delete needs a {PROPERTY_STATUS} property on {}",
                record.schema().name()
            )));
        }

        self.middlewares
            .run(record, Action::Delete, &ActionParams::delete(hard))
            .await?;

        if !hard {
            record.set(PROPERTY_STATUS, STATUS_DELETED)?;
        }
        Ok((uri, hard))
    }

    /// Assign the resolved address and label, and forget change flags.
    ///
    /// Called after a successful save and for every rehydrated row.
    pub fn settle(&self, record: &mut Record, uri: ObjectUri) {
        record.set_uri(uri);
        self.refresh_label(record);
        record.clear_changes();
    }

    /// Run READ middlewares after stored data was merged.
    ///
    /// # Errors
    /// Returns the first middleware error.
    pub async fn after_read(&self, record: &mut Record) -> BackendResult<()> {
        self.middlewares
            .run(record, Action::Read, &ActionParams::default())
            .await?;
        self.refresh_label(record);
        record.clear_changes();
        Ok(())
    }

    fn refresh_label(&self, record: &mut Record) {
        if let Some(label) = record.label() {
            let mut uri = record.uri().clone();
            uri.set_label(label);
            record.set_uri(uri);
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Validate filter and sort properties against the template's model.
    ///
    /// # Errors
    /// Returns `UnknownProperty` for unknown paths, or `Query` for a keywords
    /// filter without the keywords middleware.
    pub fn check_query(
        &self,
        template: &Record,
        filters: &Filters,
        pagination: &SortAndLimit,
    ) -> BackendResult<()> {
        let schema = template.schema();
        filters.check(schema)?;
        pagination.check(schema)?;

        let wants_keywords = filters.iter().any(|f| f.prop == PROPERTY_KEYWORDS);
        if wants_keywords && !self.keywords_enabled() {
            return Err(BackendError::query(
                "keywords filter requires the keywords middleware",
            ));
        }
        Ok(())
    }

    /// Result metadata for a finished query.
    #[must_use]
    pub fn meta(
        &self,
        count: u64,
        pagination: &SortAndLimit,
        started: Instant,
        debug: Option<String>,
    ) -> QueryMeta {
        QueryMeta {
            count,
            offset: pagination.limits.offset,
            batch: pagination.limits.batch_literal(),
            execution_time: started.elapsed(),
            sort_field: pagination.sort_field(),
            debug: debug.filter(|_| self.config.debug),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Hierarchy;
    use polystore_core::{Filter, RefTarget};

    fn comment_record() -> Record {
        Record::new(
            ModelSchema::builder("Comment")
                .with_base_properties()
                .reference("parent", RefTarget::model("Post").with_collection("post"))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_build_path_flat() {
        let core = AdapterCore::new(AdapterConfig::new("docs")).unwrap();
        let record = comment_record();
        let uri = core.build_path(&record, "c1").unwrap();
        assert_eq!(uri.literal(), "docs:comment/c1");
    }

    #[test]
    fn test_build_path_nested_under_parent() {
        let config = AdapterConfig::new("docs").with_hierarchy("comment", Hierarchy::Subcollection);
        let core = AdapterCore::new(config).unwrap();

        let mut record = comment_record();
        assert!(matches!(
            core.build_path(&record, "c1"),
            Err(BackendError::UnresolvableCollection { .. })
        ));

        record.set("parent", "post/p1").unwrap();
        let uri = core.build_path(&record, "c1").unwrap();
        assert_eq!(uri.path(), "post/p1/comment/c1");
    }

    #[test]
    fn test_target_requires_identifier() {
        let core = AdapterCore::new(AdapterConfig::default()).unwrap();
        let mut record = comment_record();
        assert!(matches!(
            core.target(&record, "read"),
            Err(BackendError::MissingIdentifier { .. })
        ));

        record.set_uri(ObjectUri::parse("c1").unwrap());
        assert_eq!(core.target(&record, "read").unwrap().path(), "comment/c1");
    }

    #[test]
    fn test_keywords_filter_needs_middleware() {
        let mut core = AdapterCore::new(AdapterConfig::default()).unwrap();
        let record = comment_record();
        let filters = Filters::new().and(Filter::equals("keywords", "jo"));

        assert!(core
            .check_query(&record, &filters, &SortAndLimit::default())
            .is_err());

        core.add_middleware(KeywordsMiddleware::new()).unwrap();
        assert!(core
            .check_query(&record, &filters, &SortAndLimit::default())
            .is_ok());
    }

    #[tokio::test]
    async fn test_soft_delete_flips_status() {
        let core = AdapterCore::new(AdapterConfig::default().with_soft_delete(true)).unwrap();
        let mut record = comment_record();
        record.set_uri(ObjectUri::build("comment", "c1").unwrap());

        let (_, hard) = core.before_delete(&mut record, false).await.unwrap();
        assert!(!hard);
        assert_eq!(record.val("status").as_str(), Some("deleted"));

        let (_, hard) = core.before_delete(&mut record, true).await.unwrap();
        assert!(hard);
    }

    #[test]
    fn test_scope_parent_wins() {
        let schema = ModelSchema::builder("Comment").build().unwrap();
        let parent = ObjectUri::build("post", "p1").unwrap();
        let query = Query::new(schema).across_nesting().parent(parent.clone());
        assert_eq!(Scope::of(&query), Scope::Parent(parent));
    }
}
