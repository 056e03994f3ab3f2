//! # Polystore
//!
//! One persistence contract over a document store, PostgreSQL and SQLite.
//! Application code works with [`Record`]s addressed by [`ObjectUri`]s and
//! queries them with a portable filter algebra; each adapter translates
//! that algebra to its engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │   Repository          │ typed access to one model       │
//! │   BackendRegistry     │ alias -> adapter, one default   │
//! ├─────────────────────────────────────────────────────────┤
//! │   BackendAdapter      │ create/read/update/delete/find  │
//! │   AdapterCore         │ paths, soft delete, middleware  │
//! ├─────────────────────────────────────────────────────────┤
//! │   DocumentAdapter     │ any DocumentStore (sim, ...)    │
//! │   SqlAdapter          │ PostgresDriver, SqliteDriver    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use polystore::document::{DocumentAdapter, SimDocumentStore};
//! use polystore::{AdapterConfig, KeywordsMiddleware, Repository};
//! use polystore_core::{ModelSchema, Query};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = ModelSchema::builder("User")
//!     .with_base_properties()
//!     .string("lastname")
//!     .build()?;
//!
//! let adapter = DocumentAdapter::new(Arc::new(SimDocumentStore::new(42)), AdapterConfig::new("docs"))?
//!     .with_middleware(KeywordsMiddleware::new())?;
//! let users = Repository::new(Arc::new(adapter), schema);
//!
//! let mut jane = users.new_record();
//! jane.set("name", "Jane Doe")?;
//! jane.set("lastname", "Doe")?;
//! users.save(&mut jane).await?;
//!
//! let found = users.query(&users.query_builder().where_eq("lastname", "Doe")).await?;
//! assert_eq!(found.meta.count, 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` (default) - embedded SQLite adapter
//! - `postgres` - PostgreSQL adapter

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod config;
pub mod document;
pub mod error;
pub mod middleware;
pub mod registry;
pub mod repository;
pub mod sql;
pub mod telemetry;

pub use polystore_core;
pub use polystore_core::{
    DataReference, Filter, Filters, ModelSchema, ObjectUri, Operator, Query, QueryResult, Record,
    SortAndLimit, SortOrder, Value,
};

pub use adapter::{AdapterCore, BackendAdapter, Scope};
pub use config::{AdapterConfig, Hierarchy, PostgresConfig, SqliteConfig};
pub use document::{DocumentAdapter, DocumentStore, SimDocumentStore};
pub use error::{BackendError, BackendResult};
pub use middleware::{InjectMetaMiddleware, KeywordsMiddleware, Middleware};
pub use registry::BackendRegistry;
pub use repository::Repository;
pub use telemetry::{init_logging, LogConfig};

#[cfg(feature = "postgres")]
pub use sql::PostgresAdapter;
#[cfg(feature = "sqlite")]
pub use sql::SqliteAdapter;
