//! # medallion-core
//!
//! Shared primitives for the medallion lakehouse.
//!
//! - **Storage**: the [`StorageBackend`](storage::StorageBackend) trait with
//!   conditional writes, plus in-memory and local-directory backends
//! - **Paths**: the canonical catalog layout in [`CatalogPaths`](catalog_paths::CatalogPaths)
//! - **Locks**: per-table single-writer locks kept in storage
//! - **Identifiers**: ULID-based snapshot, commit and cycle IDs
//! - **Errors, logging and settings** shared by every other crate
//!
//! ## Example
//!
//! ```rust
//! use medallion_core::prelude::*;
//!
//! let storage = MemoryBackend::new();
//! let cycle = CycleId::generate();
//! assert_eq!(storage.object_count().unwrap(), 0);
//! assert!(!cycle.to_string().is_empty());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog_paths;
pub mod error;
pub mod id;
pub mod local_storage;
pub mod lock;
pub mod observability;
pub mod settings;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::catalog_paths::CatalogPaths;
    pub use crate::error::{Error, Result};
    pub use crate::id::{CommitId, CycleId, SnapshotId};
    pub use crate::local_storage::LocalFsBackend;
    pub use crate::lock::{LockGuard, LockInfo, TableLock};
    pub use crate::observability::{LogFormat, init_logging};
    pub use crate::settings::Settings;
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

pub use error::{Error, Result};
