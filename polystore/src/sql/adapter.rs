//! SqlAdapter - the adapter contract over any [`SqlDriver`].

use std::collections::BTreeSet;
use std::time::Instant;

use async_trait::async_trait;
use polystore_core::{Filters, ModelSchema, ObjectUri, QueryResult, Record, SortAndLimit};
use serde_json::{Map as JsonMap, Value as Json};
use tokio::sync::RwLock;

use super::builder::{self, Catalog, SelectBuilder, TableDef};
use super::{check_identifier, SqlDriver};
use crate::adapter::{AdapterCore, BackendAdapter, Scope};
use crate::config::AdapterConfig;
use crate::error::{BackendError, BackendResult};
use crate::middleware::Middleware;

/// Rows removed per statement by `delete_collection`.
pub const SQL_DELETE_BATCH_COUNT_DEFAULT: usize = 1000;

/// Relational adapter. See [`PostgresAdapter`](super::PostgresAdapter) and
/// [`SqliteAdapter`](super::SqliteAdapter) for the concrete engines.
///
/// Tables are created on first write and grow new columns as models gain
/// properties. Column sets are cached per table; tables that do not exist
/// are re-checked on every use.
pub struct SqlAdapter<D> {
    core: AdapterCore,
    driver: D,
    catalog: RwLock<Catalog>,
}

impl<D: SqlDriver> SqlAdapter<D> {
    /// Create an adapter over a connected driver.
    ///
    /// # Errors
    /// Returns `Config` if the configuration is invalid.
    pub fn new(driver: D, config: AdapterConfig) -> BackendResult<Self> {
        Ok(Self {
            core: AdapterCore::new(config)?,
            driver,
            catalog: RwLock::new(Catalog::new()),
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
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Create the table of a model, or add the columns it lacks.
    ///
    /// # Errors
    /// Returns `Config` for invalid names or a driver error.
    #[tracing::instrument(skip(self, schema), fields(model = schema.name()))]
    pub async fn ensure_table(&self, schema: &ModelSchema) -> BackendResult<()> {
        let table = TableDef::for_schema(&self.core, schema)?;
        self.ensure(&table).await
    }

    async fn ensure(&self, table: &TableDef) -> BackendResult<()> {
        let dialect = self.driver.dialect();
        let statements = match self.columns(&table.name).await? {
            Some(existing) => builder::add_columns(dialect, table, &existing),
            None => {
                let catalog = self.reference_catalog(table, Catalog::new()).await?;
                vec![builder::create_table(dialect, table, &catalog)]
            }
        };
        if statements.is_empty() {
            return Ok(());
        }

        for statement in &statements {
            self.driver.execute("ensure_table", statement).await?;
        }
        self.catalog.write().await.remove(&table.name);
        tracing::info!(table = %table.name, statements = statements.len(), "table schema updated");
        Ok(())
    }

    /// Columns of a table, cached once the table exists.
    async fn columns(&self, table: &str) -> BackendResult<Option<BTreeSet<String>>> {
        if let Some(columns) = self.catalog.read().await.get(table) {
            return Ok(Some(columns.clone()));
        }

        let found = self.driver.table_columns(table).await?;
        if let Some(columns) = &found {
            self.catalog
                .write()
                .await
                .insert(table.to_string(), columns.clone());
        }
        Ok(found)
    }

    /// Catalog of a table and its reference targets, `None` if the table
    /// does not exist yet.
    async fn catalog_for(&self, table: &TableDef) -> BackendResult<Option<Catalog>> {
        let Some(own) = self.columns(&table.name).await? else {
            return Ok(None);
        };
        let mut catalog = Catalog::new();
        catalog.insert(table.name.clone(), own);
        self.reference_catalog(table, catalog).await.map(Some)
    }

    async fn reference_catalog(
        &self,
        table: &TableDef,
        mut catalog: Catalog,
    ) -> BackendResult<Catalog> {
        for target in table.columns.iter().filter_map(|c| c.target.as_ref()) {
            if catalog.contains_key(target) {
                continue;
            }
            if let Some(columns) = self.columns(target).await? {
                catalog.insert(target.clone(), columns);
            }
        }
        Ok(catalog)
    }

    fn rehydrate(
        &self,
        template: &Record,
        id: &str,
        data: &JsonMap<String, Json>,
    ) -> BackendResult<Record> {
        let mut record = template.clone();
        record.populate_json(data)?;
        let uri = self.core.build_path(&record, id)?;
        self.core.settle(&mut record, uri);
        Ok(record)
    }
}

fn uid_of<'a>(uri: &'a ObjectUri, operation: &str) -> BackendResult<&'a str> {
    uri.uid()
        .ok_or_else(|| BackendError::missing_identifier(operation))
}

#[async_trait]
impl<D: SqlDriver> BackendAdapter for SqlAdapter<D> {
    fn core(&self) -> &AdapterCore {
        &self.core
    }

    #[tracing::instrument(skip(self, record), fields(model = record.schema().name()))]
    async fn create(&self, record: &mut Record, desired_uid: Option<&str>) -> BackendResult<()> {
        let uri = self.core.before_create(record, desired_uid).await?;
        let table = TableDef::for_schema(&self.core, record.schema())?;
        self.ensure(&table).await?;

        let id = uid_of(&uri, "create")?;
        let statement = builder::insert(self.driver.dialect(), &table, id, record)?;
        self.driver
            .execute("create", &statement)
            .await
            .map_err(|e| match e {
                BackendError::AlreadyExists { .. } => BackendError::already_exists(uri.path()),
                other => other,
            })?;

        tracing::debug!(path = %uri.path(), "row inserted");
        self.core.settle(record, uri);
        Ok(())
    }

    #[tracing::instrument(skip(self, record), fields(path = %record.uri().path()))]
    async fn read(&self, record: &mut Record) -> BackendResult<()> {
        let uri = self.core.target(record, "read")?;
        let table = TableDef::for_schema(&self.core, record.schema())?;
        let Some(catalog) = self.catalog_for(&table).await? else {
            return Err(BackendError::not_found(uri.path()));
        };

        let select = SelectBuilder::new(self.driver.dialect(), &table, record, &catalog)
            .by_id(uid_of(&uri, "read")?)?;
        let (_, data) = self
            .driver
            .fetch(&select.rows, &table, &select.joined)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::not_found(uri.path()))?;

        record.populate_json(&data)?;
        record.set_uri(uri);
        self.core.after_read(record).await
    }

    #[tracing::instrument(skip(self, record), fields(path = %record.uri().path()))]
    async fn update(&self, record: &mut Record) -> BackendResult<()> {
        let uri = self.core.before_update(record).await?;
        let table = TableDef::for_schema(&self.core, record.schema())?;
        self.ensure(&table).await?;

        let id = uid_of(&uri, "update")?;
        if let Some(statement) = builder::update(self.driver.dialect(), &table, id, record)? {
            if self.driver.execute("update", &statement).await? == 0 {
                return Err(BackendError::not_found(uri.path()));
            }
        }

        self.core.settle(record, uri);
        Ok(())
    }

    #[tracing::instrument(skip(self, record), fields(path = %record.uri().path()))]
    async fn delete(&self, record: &mut Record, hard_delete: bool) -> BackendResult<()> {
        let (uri, hard) = self.core.before_delete(record, hard_delete).await?;
        let table = TableDef::for_schema(&self.core, record.schema())?;
        let id = uid_of(&uri, "delete")?;

        if hard {
            if self.columns(&table.name).await?.is_some() {
                let statement = builder::delete(self.driver.dialect(), &table.name, id);
                self.driver.execute("delete", &statement).await?;
            }
            record.clear_uri();
            record.clear_changes();
            return Ok(());
        }

        self.ensure(&table).await?;
        if let Some(statement) = builder::update(self.driver.dialect(), &table, id, record)? {
            if self.driver.execute("delete", &statement).await? == 0 {
                return Err(BackendError::not_found(uri.path()));
            }
        }
        self.core.settle(record, uri);
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_collection(
        &self,
        collection: &str,
        batch_size: Option<usize>,
    ) -> BackendResult<()> {
        let table = check_identifier(collection)?;
        if self.columns(table).await?.is_none() {
            tracing::debug!(table, "no table, nothing to delete");
            return Ok(());
        }

        let batch = batch_size.unwrap_or(SQL_DELETE_BATCH_COUNT_DEFAULT).max(1);
        let batch_rows = u64::try_from(batch).unwrap_or(u64::MAX);
        let statement = builder::delete_batch(self.driver.dialect(), table, batch);

        let mut deleted = 0u64;
        loop {
            let removed = self.driver.execute("delete_collection", &statement).await?;
            deleted += removed;
            if removed < batch_rows {
                break;
            }
        }

        tracing::info!(table, deleted, "collection deleted");
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

        let table = TableDef::for_schema(&self.core, template.schema())?;
        let Some(catalog) = self.catalog_for(&table).await? else {
            return Ok(QueryResult {
                items: Vec::new(),
                meta: self.core.meta(0, pagination, started, None),
            });
        };

        let select = SelectBuilder::new(self.driver.dialect(), &table, template, &catalog)
            .build(filters, pagination, scope)?;
        if self.core.config().debug {
            tracing::debug!(
                sql = %select.rows.sql,
                params = select.rows.params.len(),
                "sql query"
            );
        }

        let count = self.driver.fetch_count(&select.count).await?;
        let items = self
            .driver
            .fetch(&select.rows, &table, &select.joined)
            .await?
            .iter()
            .map(|(id, data)| self.rehydrate(template, id, data))
            .collect::<BackendResult<Vec<_>>>()?;

        Ok(QueryResult {
            items,
            meta: self.core.meta(count, pagination, started, Some(select.rows.sql)),
        })
    }
}

impl<D> std::fmt::Debug for SqlAdapter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlAdapter")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
