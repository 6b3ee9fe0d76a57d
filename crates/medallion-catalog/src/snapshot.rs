//! Immutable table snapshots and the records that point at them.
//!
//! A table's state in storage is three kinds of objects:
//!
//! - `pointer.json` ([`TablePointer`]): the current version, swung by CAS
//! - `snapshots/v{n}-{id}.json` ([`SnapshotFile`]): written once, never modified
//! - `commits/{id}.json` ([`CommitRecord`]): one per commit, hash-chained

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use medallion_core::id::{CommitId, SnapshotId};

use crate::error::{CatalogError, Result};
use crate::name::TableRef;
use crate::schema::{Row, Schema};
use crate::value::Value;

/// Current state of a table, stored at its pointer path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePointer {
    /// The table.
    pub table: TableRef,
    /// Current snapshot version; starts at 1.
    pub version: u64,
    /// Snapshot backing this version.
    pub snapshot_id: SnapshotId,
    /// Schema of the current snapshot.
    pub schema: Schema,
    /// Bumped whenever the schema changes non-additively.
    pub schema_version: u32,
    /// Content hash of the current snapshot.
    pub content_hash: String,
    /// Rows in the current snapshot.
    pub row_count: u64,
    /// Fingerprint of the inputs that produced this snapshot, if derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
    /// Most recent commit record.
    pub last_commit_id: CommitId,
    /// When the table was first created.
    pub created_at: DateTime<Utc>,
    /// When the current version was committed.
    pub committed_at: DateTime<Utc>,
}

impl TablePointer {
    /// Checks a schema declared for this table against the stored one.
    ///
    /// A declaration may add columns; dropping or retyping a stored column
    /// is a [`CatalogError::SchemaConflict`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::SchemaConflict`] naming the offending column.
    pub fn check_declared(&self, declared: Option<&Schema>) -> Result<()> {
        match declared.and_then(|d| self.schema.incompatibility(d)) {
            Some(reason) => Err(CatalogError::SchemaConflict {
                table: self.table.to_string(),
                message: format!("declared schema conflicts with the stored one: {reason}"),
            }),
            None => Ok(()),
        }
    }
}

/// A committed, immutable table state.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The table.
    pub table: TableRef,
    /// Version number of this snapshot.
    pub version: u64,
    /// Unique snapshot ID.
    pub snapshot_id: SnapshotId,
    /// Row schema.
    pub schema: Schema,
    /// Schema version at commit time.
    pub schema_version: u32,
    /// Rows, aligned with `schema`.
    pub rows: Vec<Row>,
    /// Hash of schema and rows; equal content gives equal hashes.
    pub content_hash: String,
    /// Fingerprint of the inputs, if derived.
    pub input_fingerprint: Option<String>,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
}

impl Snapshot {
    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }

    pub(crate) fn to_file(&self) -> SnapshotFile {
        SnapshotFile {
            table: self.table.clone(),
            version: self.version,
            snapshot_id: self.snapshot_id,
            schema: self.schema.clone(),
            schema_version: self.schema_version,
            content_hash: self.content_hash.clone(),
            input_fingerprint: self.input_fingerprint.clone(),
            committed_at: self.committed_at,
            rows: encode_rows(&self.rows),
        }
    }

    pub(crate) fn from_file(file: SnapshotFile) -> Result<Self> {
        let columns = file.schema.columns();
        let mut rows = Vec::with_capacity(file.rows.len());
        for cells in &file.rows {
            if cells.len() != columns.len() {
                return Err(CatalogError::Core(medallion_core::Error::serialization(
                    format!(
                        "snapshot {} v{} has a row of {} cells for {} columns",
                        file.table,
                        file.version,
                        cells.len(),
                        columns.len()
                    ),
                )));
            }
            let row = cells
                .iter()
                .zip(columns)
                .map(|(cell, column)| Value::from_json(cell, column.data_type, &column.name))
                .collect::<Result<Row>>()?;
            rows.push(row);
        }
        Ok(Self {
            table: file.table,
            version: file.version,
            snapshot_id: file.snapshot_id,
            schema: file.schema,
            schema_version: file.schema_version,
            rows,
            content_hash: file.content_hash,
            input_fingerprint: file.input_fingerprint,
            committed_at: file.committed_at,
        })
    }
}

/// On-disk form of a [`Snapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SnapshotFile {
    pub table: TableRef,
    pub version: u64,
    pub snapshot_id: SnapshotId,
    pub schema: Schema,
    pub schema_version: u32,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_fingerprint: Option<String>,
    pub committed_at: DateTime<Utc>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

fn encode_rows(rows: &[Row]) -> Vec<Vec<serde_json::Value>> {
    rows.iter()
        .map(|row| row.iter().map(Value::to_json).collect())
        .collect()
}

#[derive(Serialize)]
struct ContentHashInput<'a> {
    schema: &'a Schema,
    rows: Vec<Vec<serde_json::Value>>,
}

/// Computes the `sha256:`-prefixed content hash of schema and rows.
///
/// The hash ignores version, IDs and timestamps, so re-deriving identical
/// rows gives an identical hash.
///
/// # Errors
///
/// Returns a serialization error if the content cannot be encoded.
pub fn content_hash(schema: &Schema, rows: &[Row]) -> Result<String> {
    let input = ContentHashInput {
        schema,
        rows: encode_rows(rows),
    };
    let bytes = serde_json::to_vec(&input)
        .map_err(|e| medallion_core::Error::serialization(format!("hash snapshot: {e}")))?;
    Ok(sha256_prefixed(&bytes))
}

pub(crate) fn sha256_prefixed(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Kind of commit, recorded in the commit chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    /// First snapshot of a table.
    Create,
    /// Snapshot replacing an earlier one.
    Replace,
}

impl CommitKind {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Replace => "replace",
        }
    }
}

/// Audit record of one commit, chained to its predecessor by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    /// This commit.
    pub commit_id: CommitId,
    /// The table.
    pub table: TableRef,
    /// Version published by this commit.
    pub version: u64,
    /// Snapshot published by this commit.
    pub snapshot_id: SnapshotId,
    /// What kind of commit this was.
    pub kind: CommitKind,
    /// Previous commit of the table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_commit_id: Option<CommitId>,
    /// Hash of the previous commit record's bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_commit_hash: Option<String>,
    /// Content hash of the published snapshot.
    pub content_hash: String,
    /// Commit time.
    pub created_at: DateTime<Utc>,
}
