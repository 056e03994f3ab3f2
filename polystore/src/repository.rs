//! Repository - Application-Facing Access to One Model

use std::sync::Arc;

use polystore_core::{ModelSchema, ObjectUri, Query, QueryResult, Record, PROPERTY_STATUS, STATUS_DELETED};

use crate::adapter::BackendAdapter;
use crate::error::{BackendError, BackendResult};

/// Thin layer over one adapter and one model.
///
/// Turns "not found" into `None` and soft-deleted records into `Gone`.
#[derive(Clone)]
pub struct Repository {
    adapter: Arc<dyn BackendAdapter>,
    schema: Arc<ModelSchema>,
}

impl Repository {
    /// Create a repository.
    #[must_use]
    pub fn new(adapter: Arc<dyn BackendAdapter>, schema: Arc<ModelSchema>) -> Self {
        Self { adapter, schema }
    }

    /// Model served by this repository.
    #[must_use]
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Unsaved record of this model.
    #[must_use]
    pub fn new_record(&self) -> Record {
        Record::new(Arc::clone(&self.schema))
    }

    /// Load a record by address.
    ///
    /// # Errors
    /// Returns `Gone` for soft-deleted records; other adapter errors as-is.
    #[tracing::instrument(skip(self), fields(model = self.schema.name()))]
    pub async fn get(&self, uri: &ObjectUri) -> BackendResult<Option<Record>> {
        let mut record = self.new_record();
        record.set_uri(uri.clone());

        match self.adapter.read(&mut record).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        }

        if record.val(PROPERTY_STATUS).as_str() == Some(STATUS_DELETED) {
            return Err(BackendError::gone(uri.path()));
        }
        Ok(Some(record))
    }

    /// Create unsaved records, update persisted ones.
    ///
    /// # Errors
    /// Returns adapter errors as-is.
    pub async fn save(&self, record: &mut Record) -> BackendResult<()> {
        if record.is_persisted() {
            self.adapter.update(record).await
        } else {
            self.adapter.create(record, None).await
        }
    }

    /// Delete a record, soft when the adapter is configured for it.
    ///
    /// # Errors
    /// Returns adapter errors as-is.
    pub async fn delete(&self, record: &mut Record, hard_delete: bool) -> BackendResult<()> {
        self.adapter.delete(record, hard_delete).await
    }

    /// Query this model.
    ///
    /// # Errors
    /// Returns `Query` if the query targets another model.
    pub async fn query(&self, query: &Query) -> BackendResult<QueryResult> {
        if query.schema().name() != self.schema.name() {
            return Err(BackendError::query(format!(
                "query for {} sent to the {} repository",
                query.schema().name(),
                self.schema.name()
            )));
        }
        self.adapter.query(query).await
    }

    /// Start a query against this model.
    #[must_use]
    pub fn query_builder(&self) -> Query {
        Query::new(Arc::clone(&self.schema))
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("adapter", &self.adapter.alias())
            .field("model", &self.schema.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterConfig;
    use crate::document::{DocumentAdapter, SimDocumentStore};

    fn repository(soft_delete: bool) -> Repository {
        let adapter = DocumentAdapter::new(
            Arc::new(SimDocumentStore::new(7)),
            AdapterConfig::new("docs").with_soft_delete(soft_delete),
        )
        .unwrap();
        let schema = ModelSchema::builder("User")
            .with_base_properties()
            .string("lastname")
            .build()
            .unwrap();
        Repository::new(Arc::new(adapter), schema)
    }

    #[tokio::test]
    async fn test_missing_record_is_none() {
        let repo = repository(false);
        let uri = ObjectUri::build("user", "ghost").unwrap();
        assert!(repo.get(&uri).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_get() {
        let repo = repository(false);
        let mut user = repo.new_record();
        user.set("lastname", "Doe").unwrap();
        repo.save(&mut user).await.unwrap();

        user.set("lastname", "Roe").unwrap();
        repo.save(&mut user).await.unwrap();

        let loaded = repo.get(user.uri()).await.unwrap().unwrap();
        assert_eq!(loaded.val("lastname").as_str(), Some("Roe"));
    }

    #[tokio::test]
    async fn test_soft_deleted_record_is_gone() {
        let repo = repository(true);
        let mut user = repo.new_record();
        repo.save(&mut user).await.unwrap();
        let uri = user.uri().clone();

        repo.delete(&mut user, false).await.unwrap();
        assert!(matches!(repo.get(&uri).await, Err(BackendError::Gone { .. })));

        repo.delete(&mut user, true).await.unwrap();
        assert!(repo.get(&uri).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_query_for_other_model_rejected() {
        let repo = repository(false);
        let other = ModelSchema::builder("Entity").build().unwrap();
        assert!(repo.query(&Query::new(other)).await.is_err());
    }
}
