//! Document-Store Adapter
//!
//! TigerStyle: Translate the query algebra into native document queries.
//!
//! # Translation
//!
//! ```text
//! Filter{prop, op, value}  ──►  where(field, native-op, json)
//!   reference property     ──►  where("prop.ref", ==, "coll/uid")
//!   keywords               ──►  where("keywords", array-contains, lower(value))
//!   uid                    ──►  where(__id__, ==, uid)
//! Sorting                  ──►  orderBy(field, dir)
//! Limits                   ──►  offset(n).limit(m)     (no limit when batch = -1)
//! ```
//!
//! Nested models are stored under their parent document. Without a parent
//! scope a nested collection is queried as a collection group.

mod driver;
mod sim;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use polystore_core::{
    Filter, Filters, ObjectUri, Operator, PropertyDef, QueryResult, Record, SortAndLimit,
    SortOrder, StorageClass, Value, PROPERTY_KEYWORDS, PROPERTY_UID,
};
use serde_json::{Map as JsonMap, Value as Json};

use crate::adapter::{AdapterCore, BackendAdapter, Scope};
use crate::config::AdapterConfig;
use crate::error::{BackendError, BackendResult};
use crate::middleware::Middleware;

pub use driver::{
    DocOperator, DocOrder, DocTarget, DocWhere, Document, DocumentQuery, DocumentStore,
    DOCUMENT_ID_FIELD,
};
pub use sim::SimDocumentStore;

/// Documents removed per round trip by `delete_collection`.
pub const DOCUMENT_DELETE_BATCH_COUNT_DEFAULT: usize = 500;

/// Upper bound for prefix range emulation of `like`.
const PREFIX_RANGE_END: char = '\u{f8ff}';

// =============================================================================
// DocumentAdapter
// =============================================================================

/// Adapter over a schemaless document store.
pub struct DocumentAdapter {
    core: AdapterCore,
    store: Arc<dyn DocumentStore>,
}

impl DocumentAdapter {
    /// Create an adapter over a driver.
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid.
    pub fn new(store: Arc<dyn DocumentStore>, config: AdapterConfig) -> BackendResult<Self> {
        Ok(Self {
            core: AdapterCore::new(config)?,
            store,
        })
    }

    /// Register a middleware.
    ///
    /// # Errors
    /// Returns `DuplicateMiddleware` for a second middleware of one type.
    pub fn with_middleware<M: Middleware>(mut self, middleware: M) -> BackendResult<Self> {
        self.core.add_middleware(middleware)?;
        Ok(self)
    }

    /// Underlying driver.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Stored form of a record: every persisted property, or only the
    /// changed ones, plus the keywords index.
    fn document_data(&self, record: &Record, only_changed: bool) -> JsonMap<String, Json> {
        let mut data = if only_changed {
            record
                .changed_properties()
                .into_iter()
                .filter(|name| {
                    record
                        .schema()
                        .property(name)
                        .is_some_and(PropertyDef::is_persisted)
                })
                .map(|name| (name.to_string(), record.val(name).to_json()))
                .collect()
        } else {
            record.to_json()
        };

        if let Some(keywords) = record.keywords() {
            data.insert(
                PROPERTY_KEYWORDS.to_string(),
                Json::Array(keywords.iter().cloned().map(Json::String).collect()),
            );
        }
        data
    }

    fn target(&self, template: &Record, scope: &Scope) -> BackendResult<DocTarget> {
        let collection = self.core.collection(template)?;
        Ok(match scope {
            Scope::Parent(parent) => DocTarget::Collection(format!("{}/{collection}", parent.path())),
            Scope::AcrossNesting => DocTarget::Group(collection.to_string()),
            Scope::Collection if self.core.is_subcollection(collection) => {
                DocTarget::Group(collection.to_string())
            }
            Scope::Collection => DocTarget::Collection(collection.to_string()),
        })
    }

    fn build_query(
        &self,
        template: &Record,
        filters: &Filters,
        pagination: &SortAndLimit,
        scope: &Scope,
    ) -> BackendResult<DocumentQuery> {
        let mut query = DocumentQuery::new(self.target(template, scope)?);

        for filter in filters {
            query
                .wheres
                .extend(translate_filter(&self.core, template, filter)?);
        }

        for sorting in &pagination.sortings {
            query.order_by.push(DocOrder {
                field: field_for(template, &sorting.prop),
                descending: sorting.order == SortOrder::Desc,
            });
        }
        query.offset = pagination.limits.offset;
        query.limit = pagination.limits.batch;

        Ok(query)
    }

    fn rehydrate(&self, template: &Record, doc: &Document) -> BackendResult<Record> {
        let mut record = template.clone();
        record.populate_json(&doc.data)?;
        let uri = ObjectUri::parse(&doc.path)?.with_backend(self.alias().to_string());
        self.core.settle(&mut record, uri);
        Ok(record)
    }
}

#[async_trait]
impl BackendAdapter for DocumentAdapter {
    fn core(&self) -> &AdapterCore {
        &self.core
    }

    #[tracing::instrument(skip(self, record), fields(model = record.schema().name()))]
    async fn create(&self, record: &mut Record, desired_uid: Option<&str>) -> BackendResult<()> {
        let uri = self.core.before_create(record, desired_uid).await?;
        let data = self.document_data(record, false);

        self.store.create(&uri.path(), data).await?;
        tracing::debug!(path = %uri.path(), "document created");

        self.core.settle(record, uri);
        Ok(())
    }

    #[tracing::instrument(skip(self, record), fields(path = %record.uri().path()))]
    async fn read(&self, record: &mut Record) -> BackendResult<()> {
        let uri = self.core.target(record, "read")?;
        let doc = self
            .store
            .get(&uri.path())
            .await?
            .ok_or_else(|| BackendError::not_found(uri.path()))?;

        record.populate_json(&doc.data)?;
        record.set_uri(uri);
        self.core.after_read(record).await
    }

    #[tracing::instrument(skip(self, record), fields(path = %record.uri().path()))]
    async fn update(&self, record: &mut Record) -> BackendResult<()> {
        let uri = self.core.before_update(record).await?;
        let data = self.document_data(record, true);

        self.store.update(&uri.path(), data).await?;
        self.core.settle(record, uri);
        Ok(())
    }

    #[tracing::instrument(skip(self, record), fields(path = %record.uri().path()))]
    async fn delete(&self, record: &mut Record, hard_delete: bool) -> BackendResult<()> {
        let (uri, hard) = self.core.before_delete(record, hard_delete).await?;

        if hard {
            self.store.delete(&uri.path()).await?;
            record.clear_uri();
            record.clear_changes();
        } else {
            let data = self.document_data(record, true);
            self.store.update(&uri.path(), data).await?;
            self.core.settle(record, uri);
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_collection(
        &self,
        collection: &str,
        batch_size: Option<usize>,
    ) -> BackendResult<()> {
        let batch = batch_size
            .unwrap_or(DOCUMENT_DELETE_BATCH_COUNT_DEFAULT)
            .max(1);
        let target = if self.core.is_subcollection(collection) {
            DocTarget::Group(collection.to_string())
        } else {
            DocTarget::Collection(collection.to_string())
        };

        let mut deleted = 0usize;
        loop {
            // Re-query after every committed batch instead of paging through
            // a snapshot of all keys
            let mut query = DocumentQuery::new(target.clone());
            query.limit = Some(batch);

            let paths: Vec<String> = self
                .store
                .run_query(&query)
                .await?
                .into_iter()
                .map(|doc| doc.path)
                .collect();
            if paths.is_empty() {
                break;
            }

            self.store.delete_batch(&paths).await?;
            deleted += paths.len();
            if paths.len() < batch {
                break;
            }
        }

        tracing::info!(collection, deleted, "collection deleted");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(model = template.schema().name()))]
    async fn find(
        &self,
        template: &Record,
        filters: &Filters,
        pagination: &SortAndLimit,
        scope: &Scope,
    ) -> BackendResult<QueryResult> {
        let started = Instant::now();
        self.core.check_query(template, filters, pagination)?;

        let query = self.build_query(template, filters, pagination, scope)?;
        let native = query.to_string();
        if self.core.config().debug {
            tracing::debug!(query = %native, "document query");
        }

        let count = self.store.count(&query.unpaginated()).await?;
        let docs = self.store.run_query(&query).await?;
        let items = docs
            .iter()
            .map(|doc| self.rehydrate(template, doc))
            .collect::<BackendResult<Vec<_>>>()?;

        Ok(QueryResult {
            items,
            meta: self.core.meta(count, pagination, started, Some(native)),
        })
    }
}

impl std::fmt::Debug for DocumentAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAdapter")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Filter Translation
// =============================================================================

/// How a filtered field is stored.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Id,
    Keywords,
    Reference,
    Array,
    Scalar,
}

fn field_kind(template: &Record, prop: &str) -> FieldKind {
    if prop == PROPERTY_UID {
        return FieldKind::Id;
    }
    if prop == PROPERTY_KEYWORDS {
        return FieldKind::Keywords;
    }
    match template.schema().property(prop).map(PropertyDef::storage) {
        Some(StorageClass::Reference) => FieldKind::Reference,
        Some(StorageClass::TextArray) => FieldKind::Array,
        _ => FieldKind::Scalar,
    }
}

fn field_for(template: &Record, prop: &str) -> String {
    match field_kind(template, prop) {
        FieldKind::Id => DOCUMENT_ID_FIELD.to_string(),
        FieldKind::Reference => format!("{prop}.ref"),
        _ => prop.to_string(),
    }
}

/// Encode one compared value for a field.
fn encode(
    core: &AdapterCore,
    template: &Record,
    prop: &str,
    kind: FieldKind,
    value: &Value,
) -> BackendResult<Json> {
    Ok(match kind {
        FieldKind::Id => Json::String(last_segment(&value.to_text().unwrap_or_default())),
        FieldKind::Keywords => Json::String(value.to_text().unwrap_or_default().to_lowercase()),
        FieldKind::Reference => {
            let property = template
                .schema()
                .property(prop)
                .ok_or_else(|| BackendError::query(format!("unknown reference {prop}")))?;
            match value {
                Value::String(id) if !id.contains('/') => {
                    match core.reference_collection(property) {
                        Some(collection) => Json::String(format!("{collection}/{id}")),
                        None => Json::String(id.clone()),
                    }
                }
                other => match property.coerce(other.clone())? {
                    Value::Reference(r) => Json::String(r.reference),
                    _ => Json::Null,
                },
            }
        }
        FieldKind::Array | FieldKind::Scalar => value.to_json(),
    })
}

fn last_segment(text: &str) -> String {
    text.rsplit('/').next().unwrap_or(text).to_string()
}

fn translate_filter(
    core: &AdapterCore,
    template: &Record,
    filter: &Filter,
) -> BackendResult<Vec<DocWhere>> {
    let prop = filter.prop.as_str();
    let kind = field_kind(template, prop);
    let field = field_for(template, prop);
    let is_array = matches!(kind, FieldKind::Array | FieldKind::Keywords);

    let one = |op: DocOperator, value: Json| -> BackendResult<Vec<DocWhere>> {
        Ok(vec![DocWhere {
            field: field.clone(),
            op,
            value,
        }])
    };
    let scalar = |value: &Value| encode(core, template, prop, kind, value);
    let listed = |value: &Value| -> BackendResult<Json> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(scalar)
                .collect::<BackendResult<Vec<_>>>()
                .map(Json::Array),
            other => Ok(Json::Array(vec![scalar(other)?])),
        }
    };
    let unsupported = || -> BackendResult<Vec<DocWhere>> {
        Err(BackendError::query(format!(
            "operator {} is not supported on {prop}",
            filter.operator
        )))
    };

    let value = &filter.value;
    let is_list = matches!(value, Value::Array(_));

    match filter.operator {
        Operator::IsNull => one(DocOperator::Eq, Json::Null),
        Operator::IsNotNull => one(DocOperator::Ne, Json::Null),
        Operator::Equals if value.is_null() => one(DocOperator::Eq, Json::Null),
        Operator::NotEquals if value.is_null() => one(DocOperator::Ne, Json::Null),
        Operator::Equals if is_array && is_list => one(DocOperator::ArrayContainsAny, listed(value)?),
        Operator::Equals if is_array => one(DocOperator::ArrayContains, scalar(value)?),
        Operator::Equals if is_list => one(DocOperator::In, listed(value)?),
        Operator::Equals => one(DocOperator::Eq, scalar(value)?),
        Operator::NotEquals | Operator::NotContains if is_array => {
            one(DocOperator::ArrayNotContainsAny, listed(value)?)
        }
        Operator::NotEquals if is_list => one(DocOperator::NotIn, listed(value)?),
        Operator::NotEquals => one(DocOperator::Ne, scalar(value)?),
        Operator::Greater => one(DocOperator::Gt, scalar(value)?),
        Operator::GreaterOrEquals => one(DocOperator::Ge, scalar(value)?),
        Operator::Lower => one(DocOperator::Lt, scalar(value)?),
        Operator::LowerOrEquals => one(DocOperator::Le, scalar(value)?),
        Operator::Contains | Operator::ContainsAll if is_array => {
            let Json::Array(items) = listed(value)? else {
                return unsupported();
            };
            Ok(items
                .into_iter()
                .map(|item| DocWhere {
                    field: field.clone(),
                    op: DocOperator::ArrayContains,
                    value: item,
                })
                .collect())
        }
        Operator::ContainsAny if is_array => one(DocOperator::ArrayContainsAny, listed(value)?),
        Operator::ContainsAny => one(DocOperator::In, listed(value)?),
        Operator::NotContains if !is_array => one(DocOperator::NotIn, listed(value)?),
        Operator::Like => {
            let pattern = value.to_text().unwrap_or_default();
            let prefix = pattern.strip_suffix('%').filter(|p| !p.contains(['%', '_']));
            match prefix {
                Some(prefix) => Ok(vec![
                    DocWhere {
                        field: field.clone(),
                        op: DocOperator::Ge,
                        value: Json::String(prefix.to_string()),
                    },
                    DocWhere {
                        field: field.clone(),
                        op: DocOperator::Lt,
                        value: Json::String(format!("{prefix}{PREFIX_RANGE_END}")),
                    },
                ]),
                None => Err(BackendError::query(format!(
                    "only prefix patterns ('abc%') are supported on {prop}, got '{pattern}'"
                ))),
            }
        }
        Operator::Contains | Operator::ContainsAll | Operator::NotContains => unsupported(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{ModelSchema, RefTarget};

    fn template() -> Record {
        Record::new(
            ModelSchema::builder("User")
                .with_base_properties()
                .string("lastname")
                .array("tags")
                .reference("entity", RefTarget::model("Entity").with_collection("entity"))
                .build()
                .unwrap(),
        )
    }

    fn translate(filter: Filter) -> BackendResult<Vec<DocWhere>> {
        let core = AdapterCore::new(AdapterConfig::default()).unwrap();
        translate_filter(&core, &template(), &filter)
    }

    #[test]
    fn test_operator_table() {
        let cases = [
            (Operator::Equals, DocOperator::Eq),
            (Operator::NotEquals, DocOperator::Ne),
            (Operator::Greater, DocOperator::Gt),
            (Operator::GreaterOrEquals, DocOperator::Ge),
            (Operator::Lower, DocOperator::Lt),
            (Operator::LowerOrEquals, DocOperator::Le),
        ];
        for (op, native) in cases {
            let wheres = translate(Filter::new("lastname", op, "Doe")).unwrap();
            assert_eq!(wheres.len(), 1);
            assert_eq!(wheres[0].op, native, "{op}");
        }
    }

    #[test]
    fn test_reference_filter_targets_ref_path() {
        let wheres = translate(Filter::equals("entity", "e1")).unwrap();
        assert_eq!(wheres[0].field, "entity.ref");
        assert_eq!(wheres[0].value, Json::String("entity/e1".into()));
    }

    #[test]
    fn test_reference_filter_honours_mapping() {
        let core = AdapterCore::new(
            AdapterConfig::default().with_mapping("Entity", "organisations"),
        )
        .unwrap();
        let wheres = translate_filter(&core, &template(), &Filter::equals("entity", "e1")).unwrap();
        assert_eq!(wheres[0].value, Json::String("organisations/e1".into()));
    }

    #[test]
    fn test_array_equality_becomes_membership() {
        let wheres = translate(Filter::equals("tags", "a")).unwrap();
        assert_eq!(wheres[0].op, DocOperator::ArrayContains);

        let wheres = translate(Filter::equals("tags", vec!["a", "b"])).unwrap();
        assert_eq!(wheres[0].op, DocOperator::ArrayContainsAny);

        let wheres = translate(Filter::equals("lastname", vec!["Doe", "Roe"])).unwrap();
        assert_eq!(wheres[0].op, DocOperator::In);

        let wheres = translate(Filter::new("tags", Operator::ContainsAll, vec!["a", "b"])).unwrap();
        assert_eq!(wheres.len(), 2);
    }

    #[test]
    fn test_array_inequality_excludes_members() {
        let wheres = translate(Filter::new("tags", Operator::NotEquals, "a")).unwrap();
        assert_eq!(wheres.len(), 1);
        assert_eq!(wheres[0].op, DocOperator::ArrayNotContainsAny);
        assert_eq!(wheres[0].value, serde_json::json!(["a"]));

        let wheres = translate(Filter::new("tags", Operator::NotContains, vec!["a", "b"])).unwrap();
        assert_eq!(wheres[0].op, DocOperator::ArrayNotContainsAny);

        let wheres = translate(Filter::new("keywords", Operator::NotEquals, "JO")).unwrap();
        assert_eq!(wheres[0].value, serde_json::json!(["jo"]));

        let wheres = translate(Filter::new("lastname", Operator::NotEquals, "Doe")).unwrap();
        assert_eq!(wheres[0].op, DocOperator::Ne);
    }

    #[test]
    fn test_keywords_lowercased() {
        let wheres = translate(Filter::equals("keywords", "JO")).unwrap();
        assert_eq!(wheres[0].op, DocOperator::ArrayContains);
        assert_eq!(wheres[0].value, Json::String("jo".into()));
    }

    #[test]
    fn test_like_prefix_only() {
        let wheres = translate(Filter::new("lastname", Operator::Like, "Do%")).unwrap();
        assert_eq!(wheres.len(), 2);
        assert_eq!(wheres[0].op, DocOperator::Ge);

        assert!(translate(Filter::new("lastname", Operator::Like, "%oe")).is_err());
        assert!(translate(Filter::new("lastname", Operator::Contains, "o")).is_err());
    }

    #[test]
    fn test_uid_and_null_filters() {
        let wheres = translate(Filter::equals("uid", "user/u1")).unwrap();
        assert_eq!(wheres[0].field, DOCUMENT_ID_FIELD);
        assert_eq!(wheres[0].value, Json::String("u1".into()));

        let wheres = translate(Filter::equals("lastname", Value::Null)).unwrap();
        assert_eq!(wheres[0].value, Json::Null);
        let wheres = translate(Filter::new("lastname", Operator::IsNotNull, Value::Null)).unwrap();
        assert_eq!(wheres[0].op, DocOperator::Ne);
    }
}
