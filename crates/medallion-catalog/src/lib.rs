//! # medallion-catalog
//!
//! The catalog store of the medallion lakehouse and its read interface.
//!
//! - **Namespaces and tables**: named layers (`bronze`, `silver`, `gold`,
//!   sibling analytics namespaces) holding versioned tables
//! - **Snapshots**: immutable row sets published by a single pointer CAS
//!   under a per-table lock
//! - **Reads**: [`SnapshotHandle`]s pinned to one version, with filtered
//!   projections and group-by aggregates
//! - **Values and expressions**: the typed row model and the expression,
//!   predicate and aggregate language shared with the refresh engine
//!
//! ## Storage Layout
//!
//! ```text
//! catalog.json
//! namespaces/{namespace}.json
//! tables/{namespace}/{table}/
//! ├── pointer.json                          # current version, swung by CAS
//! ├── snapshots/v{00000001}-{snapshot_id}.json # immutable snapshot files
//! └── commits/{commit_id}.json              # hash-chained commit records
//! locks/{namespace}/{table}.lock.json
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use medallion_catalog::prelude::*;
//! use medallion_core::storage::MemoryBackend;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = CatalogStore::open(Arc::new(MemoryBackend::new()), StoreOptions::default()).await?;
//! store.create_namespace("bronze").await?;
//!
//! let schema = Schema::new(vec![Column::new("region_id", DataType::Integer)])?;
//! let rows = vec![vec![Value::Integer(1)], vec![Value::Integer(2)]];
//! let table: TableRef = "bronze.regions".parse()?;
//! store
//!     .create_table_if_absent(&table, None, MemoryRows::new(schema, rows).boxed())
//!     .await?;
//!
//! let handle = store.read_snapshot(&table).await?;
//! assert_eq!(handle.row_count(), 2);
//! # Ok::<(), CatalogError>(())
//! # }).unwrap();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod aggregate;
pub mod error;
pub mod expr;
pub mod metrics;
pub mod name;
pub mod reader;
pub mod rows;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod value;

pub use error::{CatalogError, Result};
pub use name::TableRef;
pub use reader::{SnapshotHandle, SnapshotQuery};
pub use store::{CatalogStore, StoreOptions};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::aggregate::{AggregateFunc, AggregateSpec};
    pub use crate::error::{CatalogError, Result};
    pub use crate::expr::{Expr, Predicate};
    pub use crate::name::TableRef;
    pub use crate::reader::{OrderKey, QueryResult, SnapshotHandle, SnapshotQuery};
    pub use crate::rows::{MemoryRows, RowStream, RowsProvider};
    pub use crate::schema::{Column, Row, Schema};
    pub use crate::snapshot::{CommitRecord, Snapshot, TablePointer};
    pub use crate::store::{
        CatalogStore, CommitOptions, CommitOutcome, CreateOutcome, SchemaChange, StoreOptions,
    };
    pub use crate::value::{DataType, Value};
}
