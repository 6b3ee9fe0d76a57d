//! Custom assertion helpers for integration tests.

use medallion_catalog::reader::SnapshotHandle;
use medallion_catalog::schema::Row;

use crate::storage::StorageOp;

/// Asserts that storage operations contain expected `(kind, path prefix)` pairs.
///
/// # Panics
///
/// Panics if an expected operation is not found.
pub fn assert_storage_ops_contain(ops: &[StorageOp], expected: &[(&str, &str)]) {
    for (op_type, path_prefix) in expected {
        let found = ops
            .iter()
            .any(|op| op.kind() == *op_type && op.path().starts_with(path_prefix));
        assert!(
            found,
            "Expected {op_type} operation on path starting with '{path_prefix}', not found in {ops:?}",
        );
    }
}

/// Asserts that no storage operation touched a path prefix.
///
/// # Panics
///
/// Panics if any operation accessed the given prefix.
pub fn assert_storage_ops_exclude(ops: &[StorageOp], forbidden_prefix: &str) {
    for op in ops {
        assert!(
            !op.path().starts_with(forbidden_prefix),
            "Operation on forbidden path: {} (prefix: {forbidden_prefix})",
            op.path()
        );
    }
}

/// Asserts that no write happened under a path prefix.
///
/// # Panics
///
/// Panics on the first put or delete under the prefix.
pub fn assert_no_writes_under(ops: &[StorageOp], prefix: &str) {
    for op in ops {
        if matches!(op, StorageOp::Put { .. } | StorageOp::Delete { .. }) {
            assert!(
                !op.path().starts_with(prefix),
                "Unexpected {} on {}",
                op.kind(),
                op.path()
            );
        }
    }
}

/// Asserts that a handle holds exactly `expected` rows, in order.
///
/// # Panics
///
/// Panics if the rows differ.
pub fn assert_rows(handle: &SnapshotHandle, expected: &[Row]) {
    assert_eq!(
        handle.rows(),
        expected,
        "rows of {} v{} differ",
        handle.table(),
        handle.version()
    );
}
