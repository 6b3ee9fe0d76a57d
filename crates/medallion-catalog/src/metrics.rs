//! Catalog metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use metrics::{counter, describe_counter};

/// Commits published, labelled by `kind` (`create` or `replace`).
pub const CATALOG_COMMITS: &str = "medallion_catalog_commits_total";

/// Pointer CAS attempts lost to a concurrent writer.
pub const CATALOG_CAS_RETRIES: &str = "medallion_catalog_cas_retries_total";

/// Registers metric descriptions. Call once after installing a recorder.
pub fn register_metrics() {
    describe_counter!(CATALOG_COMMITS, "Total table commits published");
    describe_counter!(CATALOG_CAS_RETRIES, "Total pointer CAS conflicts retried");
}

/// Records a published commit.
pub fn record_commit(kind: &'static str) {
    counter!(CATALOG_COMMITS, "kind" => kind).increment(1);
}

/// Records a lost pointer CAS.
pub fn record_cas_retry(table: &str) {
    counter!(CATALOG_CAS_RETRIES, "table" => table.to_string()).increment(1);
}
