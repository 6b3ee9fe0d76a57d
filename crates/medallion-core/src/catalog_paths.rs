//! Canonical storage paths for the medallion catalog.
//!
//! This module is the **single source of truth** for catalog storage paths.
//! Writers and readers must build paths through [`CatalogPaths`]; no path
//! strings are hardcoded elsewhere.
//!
//! # Path Layout
//!
//! ```text
//! {catalog_root}/
//! ├── catalog.json                          # catalog marker (format version)
//! ├── namespaces/
//! │   └── {namespace}.json                  # one record per namespace
//! ├── tables/
//! │   └── {namespace}/{table}/
//! │       ├── pointer.json                  # current version pointer (CAS target)
//! │       ├── snapshots/v{version:08}-{snapshot_id}.json  # immutable snapshots
//! │       └── commits/{commit_id}.json      # hash-chained commit records
//! └── locks/
//!     └── {namespace}/{table}.lock.json     # single-writer lock per table
//! ```

/// Canonical path generator for catalog storage.
///
/// ```
/// use medallion_core::catalog_paths::CatalogPaths;
///
/// assert_eq!(CatalogPaths::namespace("bronze"), "namespaces/bronze.json");
/// assert_eq!(
///     CatalogPaths::snapshot("gold", "mart_regional_analytics", 3, "01J0"),
///     "tables/gold/mart_regional_analytics/snapshots/v00000003-01J0.json"
/// );
/// ```
pub struct CatalogPaths;

impl CatalogPaths {
    /// Catalog marker written once at initialization.
    pub const CATALOG_MARKER: &'static str = "catalog.json";

    /// Prefix under which namespace records live.
    pub const NAMESPACES_PREFIX: &'static str = "namespaces/";

    /// Suffix of every namespace record.
    pub const NAMESPACE_SUFFIX: &'static str = ".json";

    /// File name of a table's version pointer.
    pub const POINTER_FILE: &'static str = "pointer.json";

    /// Returns the record path for a namespace.
    #[must_use]
    pub fn namespace(namespace: &str) -> String {
        format!("{}{namespace}{}", Self::NAMESPACES_PREFIX, Self::NAMESPACE_SUFFIX)
    }

    /// Returns the prefix under which all tables of a namespace live.
    #[must_use]
    pub fn tables_prefix(namespace: &str) -> String {
        format!("tables/{namespace}/")
    }

    /// Returns the directory prefix of one table.
    #[must_use]
    pub fn table_prefix(namespace: &str, table: &str) -> String {
        format!("tables/{namespace}/{table}/")
    }

    /// Returns the version pointer path of a table.
    #[must_use]
    pub fn pointer(namespace: &str, table: &str) -> String {
        format!(
            "{}{}",
            Self::table_prefix(namespace, table),
            Self::POINTER_FILE
        )
    }

    /// Returns the immutable snapshot path for one write of a table version.
    ///
    /// Every write attempt has its own snapshot ID, so a file is written
    /// exactly once; attempts that lose the pointer race leave orphans that
    /// no pointer references.
    #[must_use]
    pub fn snapshot(namespace: &str, table: &str, version: u64, snapshot_id: &str) -> String {
        format!(
            "{}{snapshot_id}.json",
            Self::snapshot_version_prefix(namespace, table, version)
        )
    }

    /// Returns the prefix shared by every snapshot file written for a
    /// table version.
    #[must_use]
    pub fn snapshot_version_prefix(namespace: &str, table: &str, version: u64) -> String {
        format!(
            "{}snapshots/v{version:08}-",
            Self::table_prefix(namespace, table)
        )
    }

    /// Returns the commit record path for a table commit.
    #[must_use]
    pub fn commit(namespace: &str, table: &str, commit_id: &str) -> String {
        format!(
            "{}commits/{commit_id}.json",
            Self::table_prefix(namespace, table)
        )
    }

    /// Returns the single-writer lock path of a table.
    #[must_use]
    pub fn table_lock(namespace: &str, table: &str) -> String {
        format!("locks/{namespace}/{table}.lock.json")
    }

    /// Extracts the table name from a pointer path listed under
    /// [`tables_prefix`](Self::tables_prefix).
    ///
    /// Returns `None` for any other object under the prefix.
    #[must_use]
    pub fn table_from_pointer_path<'a>(namespace: &str, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix("tables/")?;
        let rest = rest.strip_prefix(namespace)?.strip_prefix('/')?;
        let table = rest.strip_suffix(Self::POINTER_FILE)?.strip_suffix('/')?;
        (!table.is_empty() && !table.contains('/')).then_some(table)
    }

    /// Extracts the namespace name from a namespace record path.
    #[must_use]
    pub fn namespace_from_path(path: &str) -> Option<&str> {
        let name = path
            .strip_prefix(Self::NAMESPACES_PREFIX)?
            .strip_suffix(Self::NAMESPACE_SUFFIX)?;
        (!name.is_empty() && !name.contains('/')).then_some(name)
    }
}
