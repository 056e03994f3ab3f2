//! # Polystore Core
//!
//! Addresses, typed records and the backend-agnostic query algebra shared by
//! every polystore adapter.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Polystore Core                 │
//! ├─────────────────────────────────────────────┤
//! │  ObjectUri        │ [backend:]coll/uid/...  │
//! │  ModelSchema      │ closed property kinds   │
//! │  Record           │ values + change flags   │
//! │  Query            │ filters, sorts, limits  │
//! ├─────────────────────────────────────────────┤
//! │  DST              │ seeded faults           │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use polystore_core::{ModelSchema, ObjectUri, Record};
//!
//! let schema = ModelSchema::builder("User")
//!     .with_base_properties()
//!     .string("lastname")
//!     .build()
//!     .unwrap();
//!
//! let mut user = Record::new(schema);
//! user.set("lastname", "Doe").unwrap();
//! assert!(user.has_changed("lastname"));
//!
//! let uri = ObjectUri::parse("pg:user/u1").unwrap();
//! assert_eq!(uri.collection(), Some("user"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod constants;
pub mod dst;
pub mod error;
pub mod model;
pub mod query;
pub mod record;
pub mod uri;
pub mod value;

pub use constants::*;
pub use error::{CoreError, CoreResult};
pub use model::{ModelSchema, ModelSchemaBuilder, PropertyDef, PropertyKind, RefTarget, StorageClass};
pub use query::{
    Filter, Filters, Limits, Operator, Query, QueryMeta, QueryResult, SortAndLimit, SortOrder,
    Sorting,
};
pub use record::Record;
pub use uri::ObjectUri;
pub use value::{DataReference, Value};
