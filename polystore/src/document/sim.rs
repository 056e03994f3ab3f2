//! `SimDocumentStore` - In-Memory Document Store for Testing
//!
//! TigerStyle: Deterministic testing with fault injection.
//!
//! Implements the native operator set, collection and collection-group
//! targets, ordering and pagination over a sorted in-process map. Faults
//! registered on the injector surface as driver errors, so adapter error
//! wrapping can be exercised without a network.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use polystore_core::dst::{DeterministicRng, FaultConfig, FaultInjector};
use serde_json::{Map as JsonMap, Value as Json};

use super::driver::{
    DocOperator, DocTarget, DocWhere, Document, DocumentQuery, DocumentStore, DOCUMENT_ID_FIELD,
};
use crate::error::{BackendError, BackendResult};

// =============================================================================
// SimDocumentStore
// =============================================================================

/// In-memory document store.
///
/// TigerStyle:
/// - Deterministic via `DeterministicRng`
/// - Fault injection via `FaultInjector`
/// - Thread-safe with `RwLock`
#[derive(Debug)]
pub struct SimDocumentStore {
    documents: RwLock<BTreeMap<String, JsonMap<String, Json>>>,
    fault_injector: FaultInjector,
}

impl SimDocumentStore {
    /// Create an empty store with a seed for fault decisions.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            fault_injector: FaultInjector::new(DeterministicRng::new(seed)),
        }
    }

    /// Register a fault before the store is shared.
    #[must_use]
    pub fn with_faults(mut self, config: FaultConfig) -> Self {
        self.fault_injector.register(config);
        self
    }

    /// Fault injector, for inspecting injection counts.
    #[must_use]
    pub fn fault_injector(&self) -> &FaultInjector {
        &self.fault_injector
    }

    /// Number of stored documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if a fault should be injected for an operation.
    fn maybe_inject_fault(&self, operation: &str, context: &str) -> BackendResult<()> {
        match self.fault_injector.should_inject(operation) {
            Some(fault) => {
                let err = BackendError::driver(
                    operation,
                    context,
                    format!("simulated {}", fault.as_str()),
                );
                Err(if fault.is_transient() { err.transient() } else { err })
            }
            None => Ok(()),
        }
    }

    fn matching(&self, query: &DocumentQuery) -> Vec<Document> {
        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        documents
            .iter()
            .filter(|(path, _)| in_target(path, &query.target))
            .map(|(path, data)| Document {
                path: path.clone(),
                data: data.clone(),
            })
            .filter(|doc| query.wheres.iter().all(|w| matches_where(doc, w)))
            .collect()
    }
}

#[async_trait]
impl DocumentStore for SimDocumentStore {
    #[tracing::instrument(skip(self))]
    async fn get(&self, path: &str) -> BackendResult<Option<Document>> {
        self.maybe_inject_fault("get", path)?;

        let documents = self.documents.read().unwrap_or_else(PoisonError::into_inner);
        Ok(documents.get(path).map(|data| Document {
            path: path.to_string(),
            data: data.clone(),
        }))
    }

    #[tracing::instrument(skip(self, data))]
    async fn create(&self, path: &str, data: JsonMap<String, Json>) -> BackendResult<()> {
        self.maybe_inject_fault("create", path)?;

        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        if documents.contains_key(path) {
            return Err(BackendError::already_exists(path));
        }
        documents.insert(path.to_string(), data);
        Ok(())
    }

    #[tracing::instrument(skip(self, data))]
    async fn update(&self, path: &str, data: JsonMap<String, Json>) -> BackendResult<()> {
        self.maybe_inject_fault("update", path)?;

        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let stored = documents
            .get_mut(path)
            .ok_or_else(|| BackendError::not_found(path))?;
        stored.extend(data);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, path: &str) -> BackendResult<()> {
        self.maybe_inject_fault("delete", path)?;

        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        Ok(())
    }

    #[tracing::instrument(skip(self, query), fields(query = %query))]
    async fn run_query(&self, query: &DocumentQuery) -> BackendResult<Vec<Document>> {
        self.maybe_inject_fault("query", &query.to_string())?;

        let mut docs = self.matching(query);
        if !query.order_by.is_empty() {
            docs.sort_by(|a, b| {
                query
                    .order_by
                    .iter()
                    .map(|o| {
                        let ord = total_order(
                            &field_value(a, &o.field),
                            &field_value(b, &o.field),
                        );
                        if o.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let page = docs.into_iter().skip(query.offset);
        Ok(match query.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    #[tracing::instrument(skip(self, query), fields(query = %query))]
    async fn count(&self, query: &DocumentQuery) -> BackendResult<u64> {
        self.maybe_inject_fault("count", &query.to_string())?;
        Ok(self.matching(query).len() as u64)
    }

    #[tracing::instrument(skip(self, paths), fields(count = paths.len()))]
    async fn delete_batch(&self, paths: &[String]) -> BackendResult<()> {
        let context = paths.first().map_or("", String::as_str);
        self.maybe_inject_fault("delete_batch", context)?;

        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        for path in paths {
            documents.remove(path);
        }
        Ok(())
    }
}

// =============================================================================
// Matching
// =============================================================================

fn in_target(path: &str, target: &DocTarget) -> bool {
    let Some((collection_path, _)) = path.rsplit_once('/') else {
        return false;
    };
    match target {
        DocTarget::Collection(wanted) => collection_path == wanted,
        DocTarget::Group(name) => collection_path.rsplit('/').next() == Some(name.as_str()),
    }
}

/// Value at a dotted field path; `Null` when absent.
fn field_value(doc: &Document, field: &str) -> Json {
    if field == DOCUMENT_ID_FIELD {
        return Json::String(doc.id().to_string());
    }

    let mut parts = field.split('.');
    let Some(first) = parts.next() else {
        return Json::Null;
    };
    let mut current = doc.data.get(first);
    for part in parts {
        current = current.and_then(|v| v.get(part));
    }
    current.cloned().unwrap_or(Json::Null)
}

fn compare(a: &Json, b: &Json) -> Option<Ordering> {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Json::String(x), Json::String(y)) => Some(x.cmp(y)),
        (Json::Bool(x), Json::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn json_eq(a: &Json, b: &Json) -> bool {
    compare(a, b).map_or_else(|| a == b, |ord| ord == Ordering::Equal)
}

/// Ordering across types: null, booleans, numbers, strings, then the rest.
fn total_order(a: &Json, b: &Json) -> Ordering {
    fn rank(v: &Json) -> u8 {
        match v {
            Json::Null => 0,
            Json::Bool(_) => 1,
            Json::Number(_) => 2,
            Json::String(_) => 3,
            Json::Array(_) => 4,
            Json::Object(_) => 5,
        }
    }
    rank(a)
        .cmp(&rank(b))
        .then_with(|| compare(a, b).unwrap_or(Ordering::Equal))
}

fn matches_where(doc: &Document, w: &DocWhere) -> bool {
    let actual = field_value(doc, &w.field);
    let listed = || w.value.as_array().map_or(&[][..], Vec::as_slice);

    match w.op {
        DocOperator::Eq => json_eq(&actual, &w.value),
        DocOperator::Ne => !actual.is_null() && !json_eq(&actual, &w.value),
        DocOperator::Gt => compare(&actual, &w.value) == Some(Ordering::Greater),
        DocOperator::Ge => matches!(
            compare(&actual, &w.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        DocOperator::Lt => compare(&actual, &w.value) == Some(Ordering::Less),
        DocOperator::Le => matches!(
            compare(&actual, &w.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        DocOperator::ArrayContains => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|i| json_eq(i, &w.value))),
        DocOperator::ArrayContainsAny => actual.as_array().is_some_and(|items| {
            items
                .iter()
                .any(|i| listed().iter().any(|wanted| json_eq(i, wanted)))
        }),
        DocOperator::ArrayNotContainsAny => !actual.as_array().is_some_and(|items| {
            items
                .iter()
                .any(|i| listed().iter().any(|wanted| json_eq(i, wanted)))
        }),
        DocOperator::In => listed().iter().any(|wanted| json_eq(&actual, wanted)),
        DocOperator::NotIn => {
            !actual.is_null() && !listed().iter().any(|wanted| json_eq(&actual, wanted))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::driver::DocOrder;
    use polystore_core::dst::FaultType;
    use serde_json::json;

    fn data(value: Json) -> JsonMap<String, Json> {
        value.as_object().cloned().unwrap()
    }

    async fn seeded() -> SimDocumentStore {
        let store = SimDocumentStore::new(42);
        for (path, doc) in [
            ("user/u1", json!({"age": 30, "tags": ["a", "b"], "org": {"ref": "org/o1"}})),
            ("user/u2", json!({"age": 20, "tags": ["c"]})),
            ("user/u3", json!({"age": 40, "tags": []})),
            ("post/p1/comment/c1", json!({"age": 1})),
            ("post/p2/comment/c2", json!({"age": 2})),
        ] {
            store.create(path, data(doc)).await.unwrap();
        }
        store
    }

    fn query(target: DocTarget, wheres: Vec<DocWhere>) -> DocumentQuery {
        let mut q = DocumentQuery::new(target);
        q.wheres = wheres;
        q
    }

    fn w(field: &str, op: DocOperator, value: Json) -> DocWhere {
        DocWhere {
            field: field.to_string(),
            op,
            value,
        }
    }

    #[tokio::test]
    async fn test_create_twice_fails() {
        let store = SimDocumentStore::new(1);
        store.create("user/u1", JsonMap::new()).await.unwrap();
        let err = store.create("user/u1", JsonMap::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_merges_and_requires_existing() {
        let store = seeded().await;
        store
            .update("user/u1", data(json!({"age": 31})))
            .await
            .unwrap();
        let doc = store.get("user/u1").await.unwrap().unwrap();
        assert_eq!(doc.data["age"], json!(31));
        assert_eq!(doc.data["tags"], json!(["a", "b"]));

        assert!(store
            .update("user/ghost", JsonMap::new())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_collection_vs_group_targets() {
        let store = seeded().await;
        let top = store
            .count(&query(DocTarget::Collection("user".into()), vec![]))
            .await
            .unwrap();
        assert_eq!(top, 3);

        let nested = store
            .count(&query(DocTarget::Collection("post/p1/comment".into()), vec![]))
            .await
            .unwrap();
        assert_eq!(nested, 1);

        let group = store
            .count(&query(DocTarget::Group("comment".into()), vec![]))
            .await
            .unwrap();
        assert_eq!(group, 2);
    }

    async fn count_where(store: &SimDocumentStore, wheres: Vec<DocWhere>) -> u64 {
        let q = query(DocTarget::Collection("user".into()), wheres);
        store.count(&q).await.unwrap()
    }

    #[tokio::test]
    async fn test_operators() {
        let store = seeded().await;
        let s = &store;

        assert_eq!(count_where(s, vec![w("age", DocOperator::Le, json!(30))]).await, 2);
        assert_eq!(count_where(s, vec![w("age", DocOperator::Gt, json!(30))]).await, 1);
        assert_eq!(
            count_where(s, vec![w("tags", DocOperator::ArrayContains, json!("a"))]).await,
            1
        );
        assert_eq!(
            count_where(s, vec![w("tags", DocOperator::ArrayContainsAny, json!(["b", "c"]))]).await,
            2
        );
        assert_eq!(
            count_where(s, vec![w("tags", DocOperator::ArrayNotContainsAny, json!(["a"]))]).await,
            2
        );
        assert_eq!(
            count_where(s, vec![w("nicknames", DocOperator::ArrayNotContainsAny, json!(["a"]))])
                .await,
            3
        );
        assert_eq!(count_where(s, vec![w("age", DocOperator::In, json!([20, 40]))]).await, 2);
        assert_eq!(
            count_where(s, vec![w("org.ref", DocOperator::Eq, json!("org/o1"))]).await,
            1
        );
        assert_eq!(count_where(s, vec![w("org", DocOperator::Eq, Json::Null)]).await, 2);
        assert_eq!(
            count_where(s, vec![w(DOCUMENT_ID_FIELD, DocOperator::Eq, json!("u2"))]).await,
            1
        );
    }

    #[tokio::test]
    async fn test_order_and_pagination() {
        let store = seeded().await;
        let mut q = query(DocTarget::Collection("user".into()), vec![]);
        q.order_by.push(DocOrder {
            field: "age".into(),
            descending: true,
        });
        q.offset = 1;
        q.limit = Some(1);

        let docs = store.run_query(&q).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].path, "user/u1");
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = SimDocumentStore::new(42)
            .with_faults(FaultConfig::new(FaultType::StorageWriteFail, 1.0).with_filter("create"));

        let err = store.create("user/u1", JsonMap::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::Driver { .. }));
        assert!(!err.is_transient());
        assert_eq!(store.document_count(), 0);
        assert_eq!(store.fault_injector().total_injections(), 1);

        // Other operations are unaffected
        assert!(store.get("user/u1").await.unwrap().is_none());
    }
}
