//! The catalog store: namespaces, tables and their committed snapshots.
//!
//! Every write takes the table's storage lock and publishes a new version
//! with a single conditional write of the table pointer:
//!
//! 1. Acquire the per-table lock
//! 2. Read the pointer and its version token
//! 3. Write the immutable snapshot file for the next version, named by a
//!    fresh snapshot ID
//! 4. CAS the pointer (`MatchesVersion`, or `DoesNotExist` for the first
//!    version)
//! 5. Write the commit record, chained to the previous one by hash
//! 6. Publish the snapshot to the in-process cache and release the lock
//!
//! Until step 4 succeeds no reader can observe the new snapshot file, so a
//! write that fails or is abandoned earlier leaves the table unchanged.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use medallion_core::catalog_paths::CatalogPaths;
use medallion_core::id::{CommitId, SnapshotId};
use medallion_core::local_storage::LocalFsBackend;
use medallion_core::lock::{DEFAULT_LOCK_TTL, DEFAULT_MAX_RETRIES, LockGuard, TableLock};
use medallion_core::settings::Settings;
use medallion_core::storage::{StorageBackend, WritePrecondition, WriteResult};

use crate::error::{CatalogError, Result};
use crate::metrics::{record_cas_retry, record_commit};
use crate::name::{TableRef, validate_name};
use crate::reader::SnapshotHandle;
use crate::rows::RowsProvider;
use crate::schema::{Row, Schema};
use crate::snapshot::{
    CommitKind, CommitRecord, Snapshot, SnapshotFile, TablePointer, content_hash, sha256_prefixed,
};

/// Current on-storage layout version.
pub const FORMAT_VERSION: u32 = 1;

/// Write coordination policy of a [`CatalogStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// TTL of the per-table writer lock.
    pub lock_ttl: Duration,
    /// Attempts to acquire a contended table lock.
    pub lock_max_retries: u32,
    /// Attempts to swing the table pointer before giving up.
    pub cas_max_retries: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_ttl: DEFAULT_LOCK_TTL,
            lock_max_retries: DEFAULT_MAX_RETRIES,
            cas_max_retries: 5,
        }
    }
}

impl From<&Settings> for StoreOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            lock_ttl: settings.lock_ttl,
            lock_max_retries: settings.lock_max_retries,
            cas_max_retries: settings.cas_max_retries,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogMarker {
    format_version: u32,
    created_at: DateTime<Utc>,
}

/// Record written once when a namespace is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceRecord {
    /// Namespace name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Outcome of [`CatalogStore::create_table_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The table was created from the provider's rows.
    Created(TablePointer),
    /// The table already existed; the provider was not opened.
    Existing(TablePointer),
}

impl CreateOutcome {
    /// The table's pointer after the call.
    #[must_use]
    pub fn pointer(&self) -> &TablePointer {
        match self {
            Self::Created(p) | Self::Existing(p) => p,
        }
    }

    /// Whether this call created the table.
    #[must_use]
    pub const fn was_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// How a replacement may change the table's schema.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchemaChange {
    /// Only additive changes are accepted.
    #[default]
    Additive,
    /// Any change is accepted; incompatible ones bump the schema version.
    NewVersion,
}

/// Options for [`CatalogStore::replace_snapshot`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Fingerprint of the inputs that produced the rows.
    pub input_fingerprint: Option<String>,
    /// Allowed schema evolution.
    pub schema_change: SchemaChange,
}

impl CommitOptions {
    /// Options recording an input fingerprint.
    #[must_use]
    pub fn with_fingerprint(fingerprint: impl Into<String>) -> Self {
        Self {
            input_fingerprint: Some(fingerprint.into()),
            ..Self::default()
        }
    }
}

/// Result of a successful [`CatalogStore::replace_snapshot`].
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// The table pointer as published.
    pub pointer: TablePointer,
    /// The published snapshot.
    pub snapshot: Arc<Snapshot>,
    /// The commit record.
    pub commit: CommitRecord,
}

/// Durable registry of namespaces, tables and table versions.
///
/// Share one store through an `Arc`; all methods take `&self`.
pub struct CatalogStore {
    storage: Arc<dyn StorageBackend>,
    options: StoreOptions,
    cache: RwLock<HashMap<TableRef, Arc<Snapshot>>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for CatalogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogStore")
            .field("options", &self.options)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl CatalogStore {
    /// Opens a catalog on `storage`, initializing it if empty.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the catalog was written in an
    /// unsupported format.
    #[tracing::instrument(skip_all)]
    pub async fn open(storage: Arc<dyn StorageBackend>, options: StoreOptions) -> Result<Self> {
        let marker = CatalogMarker {
            format_version: FORMAT_VERSION,
            created_at: Utc::now(),
        };
        let put = storage
            .put(
                CatalogPaths::CATALOG_MARKER,
                json_bytes(&marker)?,
                WritePrecondition::DoesNotExist,
            )
            .await?;
        if put.is_success() {
            tracing::info!("initialized new catalog");
        } else {
            let existing: CatalogMarker =
                read_json(storage.as_ref(), CatalogPaths::CATALOG_MARKER).await?;
            if existing.format_version != FORMAT_VERSION {
                return Err(medallion_core::Error::InvalidInput(format!(
                    "catalog format version {} is not supported (expected {FORMAT_VERSION})",
                    existing.format_version
                ))
                .into());
            }
        }

        Ok(Self {
            storage,
            options,
            cache: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Opens a catalog in a local directory.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub async fn open_local(root: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        let backend = LocalFsBackend::new(root)?;
        Self::open(Arc::new(backend), options).await
    }

    /// The storage backend.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// The write coordination policy.
    #[must_use]
    pub const fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Closes the store. Operations that start after this returns fail with
    /// [`CatalogError::Closed`].
    ///
    /// Writes already past their open check run to completion and their
    /// commits stay durable. Closing drops the snapshot cache, and nothing
    /// is cached again once the store is closed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
        tracing::debug!("catalog store closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CatalogError::Closed);
        }
        Ok(())
    }

    /// Creates a namespace. Returns `false` if it already existed.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed name or a storage failure.
    #[tracing::instrument(skip(self))]
    pub async fn create_namespace(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        validate_name(name)?;
        let record = NamespaceRecord {
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let created = self
            .storage
            .put(
                &CatalogPaths::namespace(name),
                json_bytes(&record)?,
                WritePrecondition::DoesNotExist,
            )
            .await?
            .is_success();
        if created {
            tracing::info!(namespace = name, "created namespace");
        }
        Ok(created)
    }

    /// Whether a namespace exists.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn namespace_exists(&self, name: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .storage
            .head(&CatalogPaths::namespace(name))
            .await?
            .is_some())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        if self.namespace_exists(name).await? {
            Ok(())
        } else {
            Err(CatalogError::NamespaceNotFound {
                namespace: name.to_string(),
            })
        }
    }

    /// Lists namespaces in name order.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn list_namespaces(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        let mut names: Vec<String> = self
            .storage
            .list(CatalogPaths::NAMESPACES_PREFIX)
            .await?
            .iter()
            .filter_map(|meta| CatalogPaths::namespace_from_path(&meta.path))
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Lists the tables of a namespace in name order.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NamespaceNotFound`] for an unknown namespace.
    pub async fn list_tables(&self, namespace: &str) -> Result<Vec<TablePointer>> {
        self.ensure_open()?;
        self.ensure_namespace(namespace).await?;
        let mut names: Vec<String> = self
            .storage
            .list(&CatalogPaths::tables_prefix(namespace))
            .await?
            .iter()
            .filter_map(|meta| CatalogPaths::table_from_pointer_path(namespace, &meta.path))
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let table = TableRef::new(namespace, name)?;
            if let Some((pointer, _)) = self.read_pointer(&table).await? {
                tables.push(pointer);
            }
        }
        Ok(tables)
    }

    /// Returns the table's current pointer, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn table_pointer(&self, table: &TableRef) -> Result<Option<TablePointer>> {
        self.ensure_open()?;
        Ok(self.read_pointer(table).await?.map(|(p, _)| p))
    }

    /// Creates a table from `provider` unless it already exists.
    ///
    /// The existence check is repeated under the table lock, and the provider
    /// is opened only after both checks found no table. With a declared
    /// `schema`, provider rows are reordered and coerced into it; a source
    /// column missing from the declaration, or the reverse, is a
    /// [`CatalogError::SchemaConflict`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NamespaceNotFound`], provider and coercion
    /// errors, [`CatalogError::SchemaConflict`] if the table exists with a
    /// schema the declared one would drop or retype, or
    /// [`CatalogError::ConcurrentWriteConflict`] if the lock stays contended.
    /// An existing table is never modified.
    #[tracing::instrument(skip(self, schema, provider), fields(table = %table))]
    pub async fn create_table_if_absent(
        &self,
        table: &TableRef,
        schema: Option<&Schema>,
        provider: Box<dyn RowsProvider>,
    ) -> Result<CreateOutcome> {
        self.ensure_open()?;
        self.ensure_namespace(table.namespace()).await?;
        if let Some((pointer, _)) = self.read_pointer(table).await? {
            pointer.check_declared(schema)?;
            tracing::debug!(version = pointer.version, "table exists, provider not opened");
            return Ok(CreateOutcome::Existing(pointer));
        }

        let guard = self.lock(table, "create").await?;
        let result = self.create_locked(table, schema, provider).await;
        self.unlock(guard, table).await;
        result
    }

    async fn create_locked(
        &self,
        table: &TableRef,
        schema: Option<&Schema>,
        provider: Box<dyn RowsProvider>,
    ) -> Result<CreateOutcome> {
        if let Some((pointer, _)) = self.read_pointer(table).await? {
            pointer.check_declared(schema)?;
            return Ok(CreateOutcome::Existing(pointer));
        }

        let (schema, rows) = materialize(table, schema.cloned(), provider).await?;
        let hash = content_hash(&schema, &rows)?;
        let now = Utc::now();
        let snapshot = Snapshot {
            table: table.clone(),
            version: 1,
            snapshot_id: SnapshotId::generate(),
            schema,
            schema_version: 1,
            rows,
            content_hash: hash,
            input_fingerprint: None,
            committed_at: now,
        };
        self.put_snapshot(&snapshot).await?;

        let commit = self
            .build_commit_record(table, &snapshot, CommitKind::Create, None)
            .await?;
        let pointer = pointer_for(&snapshot, &commit, now);
        let path = CatalogPaths::pointer(table.namespace(), table.name());
        match self
            .storage
            .put(&path, json_bytes(&pointer)?, WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => {}
            WriteResult::PreconditionFailed { .. } => {
                // A writer without our lock (an expired holder) got there first.
                record_cas_retry(&table.to_string());
                return match self.read_pointer(table).await? {
                    Some((existing, _)) => Ok(CreateOutcome::Existing(existing)),
                    None => Err(CatalogError::ConcurrentWriteConflict {
                        table: table.to_string(),
                        message: "pointer vanished during create".into(),
                    }),
                };
            }
        }

        self.finish_commit(table, &commit, Arc::new(snapshot)).await;
        tracing::info!(rows = pointer.row_count, "created table");
        Ok(CreateOutcome::Created(pointer))
    }

    /// Materializes `provider` and publishes it as the table's next version.
    ///
    /// A missing table is created as version 1. The provider is opened once;
    /// lost pointer races are retried with the same rows up to the store's
    /// CAS budget.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::SchemaConflict`] for a non-additive schema
    /// without [`SchemaChange::NewVersion`], provider errors, or
    /// [`CatalogError::ConcurrentWriteConflict`] once the lock or CAS budget
    /// is exhausted. On error the table is unchanged.
    #[tracing::instrument(skip(self, provider, options), fields(table = %table))]
    pub async fn replace_snapshot(
        &self,
        table: &TableRef,
        provider: Box<dyn RowsProvider>,
        options: CommitOptions,
    ) -> Result<CommitOutcome> {
        self.ensure_open()?;
        self.ensure_namespace(table.namespace()).await?;

        let guard = self.lock(table, "replace").await?;
        let result = self.replace_locked(table, provider, options).await;
        self.unlock(guard, table).await;
        result
    }

    async fn replace_locked(
        &self,
        table: &TableRef,
        provider: Box<dyn RowsProvider>,
        options: CommitOptions,
    ) -> Result<CommitOutcome> {
        let (schema, rows) = materialize(table, None, provider).await?;
        let hash = content_hash(&schema, &rows)?;
        let mut snapshot = Snapshot {
            table: table.clone(),
            version: 0,
            snapshot_id: SnapshotId::generate(),
            schema,
            schema_version: 1,
            rows,
            content_hash: hash,
            input_fingerprint: options.input_fingerprint,
            committed_at: Utc::now(),
        };
        let pointer_path = CatalogPaths::pointer(table.namespace(), table.name());

        for attempt in 1..=self.options.cas_max_retries.max(1) {
            let current = self.read_pointer(table).await?;
            let (kind, precondition, prev_commit, created_at) = match &current {
                None => {
                    snapshot.version = 1;
                    snapshot.schema_version = 1;
                    (CommitKind::Create, WritePrecondition::DoesNotExist, None, None)
                }
                Some((pointer, token)) => {
                    snapshot.version = pointer.version + 1;
                    snapshot.schema_version =
                        match pointer.schema.incompatibility(&snapshot.schema) {
                            None => pointer.schema_version,
                            Some(_) if options.schema_change == SchemaChange::NewVersion => {
                                pointer.schema_version + 1
                            }
                            Some(reason) => {
                                return Err(CatalogError::SchemaConflict {
                                    table: table.to_string(),
                                    message: reason,
                                });
                            }
                        };
                    (
                        CommitKind::Replace,
                        WritePrecondition::MatchesVersion(token.clone()),
                        Some(pointer.last_commit_id),
                        Some(pointer.created_at),
                    )
                }
            };
            snapshot.snapshot_id = SnapshotId::generate();
            snapshot.committed_at = Utc::now();
            self.put_snapshot(&snapshot).await?;

            let commit = self
                .build_commit_record(table, &snapshot, kind, prev_commit)
                .await?;
            let mut pointer = pointer_for(&snapshot, &commit, snapshot.committed_at);
            if let Some(created_at) = created_at {
                pointer.created_at = created_at;
            }

            match self
                .storage
                .put(&pointer_path, json_bytes(&pointer)?, precondition)
                .await?
            {
                WriteResult::Success { .. } => {
                    let snapshot = Arc::new(snapshot);
                    self.finish_commit(table, &commit, Arc::clone(&snapshot))
                        .await;
                    tracing::info!(
                        version = pointer.version,
                        rows = pointer.row_count,
                        "published snapshot"
                    );
                    return Ok(CommitOutcome {
                        pointer,
                        snapshot,
                        commit,
                    });
                }
                WriteResult::PreconditionFailed { .. } => {
                    record_cas_retry(&table.to_string());
                    tracing::debug!(attempt, "pointer moved underneath us, retrying");
                }
            }
        }

        Err(CatalogError::ConcurrentWriteConflict {
            table: table.to_string(),
            message: format!(
                "lost the pointer race {} times",
                self.options.cas_max_retries.max(1)
            ),
        })
    }

    /// Returns a read handle pinned to the table's latest snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::NamespaceNotFound`] or
    /// [`CatalogError::TableNotFound`] if there is nothing to read.
    #[tracing::instrument(skip(self), fields(table = %table))]
    pub async fn read_snapshot(&self, table: &TableRef) -> Result<SnapshotHandle> {
        self.ensure_open()?;
        let Some((pointer, _)) = self.read_pointer(table).await? else {
            self.ensure_namespace(table.namespace()).await?;
            return Err(CatalogError::TableNotFound {
                table: table.to_string(),
            });
        };

        if let Some(cached) = self.cached(table) {
            if cached.version == pointer.version {
                return Ok(SnapshotHandle::new(cached));
            }
        }

        let snapshot = Arc::new(
            self.load_snapshot(table, pointer.version, pointer.snapshot_id)
                .await?,
        );
        self.publish(table, &snapshot);
        Ok(SnapshotHandle::new(snapshot))
    }

    /// Returns a read handle on a specific, older or current, version.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::TableNotFound`] if the version was never
    /// committed.
    pub async fn read_version(&self, table: &TableRef, version: u64) -> Result<SnapshotHandle> {
        self.ensure_open()?;
        let not_found = || CatalogError::TableNotFound {
            table: format!("{table}@v{version}"),
        };
        let Some((pointer, _)) = self.read_pointer(table).await? else {
            return Err(not_found());
        };
        if version == 0 || version > pointer.version {
            return Err(not_found());
        }
        let snapshot_id = if version == pointer.version {
            pointer.snapshot_id
        } else {
            self.committed_snapshot_id(table, version)
                .await?
                .ok_or_else(not_found)?
        };
        Ok(SnapshotHandle::new(Arc::new(
            self.load_snapshot(table, version, snapshot_id).await?,
        )))
    }

    /// Finds the snapshot an older version was committed with.
    ///
    /// Commit records are authoritative. Without one (its write is best
    /// effort), a single snapshot file for the version is unambiguous; several
    /// mean a lost race left orphans and the version cannot be resolved.
    async fn committed_snapshot_id(
        &self,
        table: &TableRef,
        version: u64,
    ) -> Result<Option<SnapshotId>> {
        if let Some(commit) = self
            .commit_history(table)
            .await?
            .into_iter()
            .find(|c| c.version == version)
        {
            return Ok(Some(commit.snapshot_id));
        }

        let prefix = CatalogPaths::snapshot_version_prefix(table.namespace(), table.name(), version);
        let candidates = self.storage.list(&prefix).await?;
        let [only] = candidates.as_slice() else {
            if !candidates.is_empty() {
                tracing::warn!(
                    version,
                    files = candidates.len(),
                    "no commit record and several snapshot files for version"
                );
            }
            return Ok(None);
        };
        Ok(only
            .path
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|id| id.parse().ok()))
    }

    /// Returns the table's commit records, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error on storage failure.
    pub async fn commit_history(&self, table: &TableRef) -> Result<Vec<CommitRecord>> {
        self.ensure_open()?;
        let prefix = format!(
            "{}commits/",
            CatalogPaths::table_prefix(table.namespace(), table.name())
        );
        let mut commits = Vec::new();
        for meta in self.storage.list(&prefix).await? {
            commits.push(read_json::<CommitRecord>(self.storage.as_ref(), &meta.path).await?);
        }
        commits.sort_by_key(|c| c.version);
        Ok(commits)
    }

    async fn read_pointer(&self, table: &TableRef) -> Result<Option<(TablePointer, String)>> {
        let path = CatalogPaths::pointer(table.namespace(), table.name());
        let Some(meta) = self.storage.head(&path).await? else {
            return Ok(None);
        };
        match self.storage.get(&path).await {
            Ok(bytes) => Ok(Some((parse_json(&bytes, &path)?, meta.version))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_snapshot(
        &self,
        table: &TableRef,
        version: u64,
        snapshot_id: SnapshotId,
    ) -> Result<Snapshot> {
        let path = CatalogPaths::snapshot(
            table.namespace(),
            table.name(),
            version,
            &snapshot_id.to_string(),
        );
        let file: SnapshotFile = read_json(self.storage.as_ref(), &path).await?;
        Snapshot::from_file(file)
    }

    /// Writes the snapshot file for one write attempt.
    ///
    /// The path carries the attempt's snapshot ID, so the write never
    /// replaces a file another writer published, even one whose lock expired
    /// underneath it.
    async fn put_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let table = &snapshot.table;
        let path = CatalogPaths::snapshot(
            table.namespace(),
            table.name(),
            snapshot.version,
            &snapshot.snapshot_id.to_string(),
        );
        match self
            .storage
            .put(
                &path,
                json_bytes(&snapshot.to_file())?,
                WritePrecondition::DoesNotExist,
            )
            .await?
        {
            WriteResult::Success { .. } => Ok(()),
            WriteResult::PreconditionFailed { .. } => Err(CatalogError::ConcurrentWriteConflict {
                table: table.to_string(),
                message: format!("snapshot file {path} already exists"),
            }),
        }
    }

    async fn build_commit_record(
        &self,
        table: &TableRef,
        snapshot: &Snapshot,
        kind: CommitKind,
        prev_commit_id: Option<CommitId>,
    ) -> Result<CommitRecord> {
        let prev_commit_hash = match prev_commit_id {
            Some(id) => {
                let path = CatalogPaths::commit(table.namespace(), table.name(), &id.to_string());
                match self.storage.get(&path).await {
                    Ok(bytes) => Some(sha256_prefixed(&bytes)),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e.into()),
                }
            }
            None => None,
        };
        Ok(CommitRecord {
            commit_id: CommitId::generate(),
            table: table.clone(),
            version: snapshot.version,
            snapshot_id: snapshot.snapshot_id,
            kind,
            prev_commit_id,
            prev_commit_hash,
            content_hash: snapshot.content_hash.clone(),
            created_at: Utc::now(),
        })
    }

    /// Post-publish bookkeeping. The pointer already names the new version,
    /// so failures here are logged rather than returned.
    async fn finish_commit(&self, table: &TableRef, commit: &CommitRecord, snapshot: Arc<Snapshot>) {
        let path = CatalogPaths::commit(
            table.namespace(),
            table.name(),
            &commit.commit_id.to_string(),
        );
        let written = match json_bytes(commit) {
            Ok(bytes) => self
                .storage
                .put(&path, bytes, WritePrecondition::DoesNotExist)
                .await
                .map_err(CatalogError::from),
            Err(e) => Err(e),
        };
        if let Err(error) = written {
            tracing::warn!(%error, commit_id = %commit.commit_id, "failed to write commit record");
        }
        record_commit(commit.kind.as_str());
        self.publish(table, &snapshot);
    }

    fn cached(&self, table: &TableRef) -> Option<Arc<Snapshot>> {
        self.cache
            .read()
            .ok()
            .and_then(|cache| cache.get(table).cloned())
    }

    fn publish(&self, table: &TableRef, snapshot: &Arc<Snapshot>) {
        if self.is_closed() {
            return;
        }
        if let Ok(mut cache) = self.cache.write() {
            let newer = cache
                .get(table)
                .is_none_or(|held| held.version < snapshot.version);
            if newer {
                cache.insert(table.clone(), Arc::clone(snapshot));
            }
        }
    }

    async fn lock(
        &self,
        table: &TableRef,
        operation: &str,
    ) -> Result<LockGuard<dyn StorageBackend>> {
        let lock = TableLock::for_table(Arc::clone(&self.storage), table.namespace(), table.name());
        lock.acquire_for(
            self.options.lock_ttl,
            self.options.lock_max_retries,
            Some(operation.to_string()),
        )
        .await
        .map_err(|e| match e {
            medallion_core::Error::PreconditionFailed { message } => {
                CatalogError::ConcurrentWriteConflict {
                    table: table.to_string(),
                    message,
                }
            }
            other => other.into(),
        })
    }

    async fn unlock(&self, guard: LockGuard<dyn StorageBackend>, table: &TableRef) {
        if let Err(error) = guard.release().await {
            tracing::warn!(%error, %table, "failed to release table lock");
        }
    }
}

fn pointer_for(snapshot: &Snapshot, commit: &CommitRecord, created_at: DateTime<Utc>) -> TablePointer {
    TablePointer {
        table: snapshot.table.clone(),
        version: snapshot.version,
        snapshot_id: snapshot.snapshot_id,
        schema: snapshot.schema.clone(),
        schema_version: snapshot.schema_version,
        content_hash: snapshot.content_hash.clone(),
        row_count: snapshot.row_count(),
        input_fingerprint: snapshot.input_fingerprint.clone(),
        last_commit_id: commit.commit_id,
        created_at,
        committed_at: snapshot.committed_at,
    }
}

/// Opens the provider and collects its rows off the async runtime.
async fn materialize(
    table: &TableRef,
    declared: Option<Schema>,
    provider: Box<dyn RowsProvider>,
) -> Result<(Schema, Vec<Row>)> {
    let table_name = table.to_string();
    let origin = provider.describe();
    tracing::debug!(%origin, "opening rows provider");
    tokio::task::spawn_blocking(move || -> Result<(Schema, Vec<Row>)> {
        let (schema, rows) = provider.open()?.into_parts();
        match declared {
            None => Ok((schema, rows.collect::<Result<Vec<Row>>>()?)),
            Some(target) => {
                let adapter = schema.projection_onto(&target, &table_name)?;
                let rows = rows
                    .map(|row| row.and_then(|r| adapter.adapt(r)))
                    .collect::<Result<Vec<Row>>>()?;
                Ok((target, rows))
            }
        }
    })
    .await
    .map_err(|e| {
        CatalogError::Core(medallion_core::Error::Internal {
            message: format!("materializing {origin} panicked: {e}"),
        })
    })?
}

fn json_bytes<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| medallion_core::Error::serialization(format!("serialize JSON: {e}")).into())
}

fn parse_json<T: DeserializeOwned>(bytes: &[u8], path: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        medallion_core::Error::serialization(format!("parse JSON at {path}: {e}")).into()
    })
}

async fn read_json<T: DeserializeOwned>(storage: &dyn StorageBackend, path: &str) -> Result<T> {
    let bytes = storage.get(path).await?;
    parse_json(&bytes, path)
}
