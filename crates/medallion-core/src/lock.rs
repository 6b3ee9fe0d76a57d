//! Per-table writer locks stored next to the catalog objects.
//!
//! Every commit to a table happens while holding that table's lock. The lock
//! is a small JSON record at [`CatalogPaths::table_lock`]:
//!
//! 1. Acquisition creates the record with a `DoesNotExist` precondition, so
//!    exactly one writer wins.
//! 2. A record whose `expiresAt` has passed may be taken over with a
//!    `MatchesVersion` write bound to the version observed by `head`.
//! 3. Release overwrites the record with an already-expired copy via CAS,
//!    which never clobbers a newer holder.
//!
//! Contended acquisitions retry with exponential backoff plus jitter and give
//! up after a configurable number of attempts.
//!
//! ```rust
//! # tokio_test_block_on(async {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use medallion_core::lock::TableLock;
//! use medallion_core::storage::MemoryBackend;
//!
//! let storage = Arc::new(MemoryBackend::new());
//! let lock = TableLock::for_table(storage, "gold", "mart_regional_analytics");
//! let guard = lock.acquire(Duration::from_secs(30), 3).await.unwrap();
//! guard.release().await.unwrap();
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::catalog_paths::CatalogPaths;
use crate::error::{Error, Result};
use crate::storage::{StorageBackend, WritePrecondition, WriteResult};

/// Default lock TTL.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Default number of acquisition attempts.
pub const DEFAULT_MAX_RETRIES: u32 = 20;

const BACKOFF_BASE: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Contents of a lock record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    /// Unique ID of the lock holder.
    pub holder_id: String,
    /// When the lock stops being valid.
    pub expires_at: DateTime<Utc>,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// Incremented on every acquisition of this lock path.
    #[serde(default)]
    pub generation: u64,
    /// What the holder is doing, for operators inspecting a stuck lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl LockInfo {
    fn new(holder_id: &str, ttl: Duration, generation: u64, operation: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            holder_id: holder_id.to_string(),
            expires_at: now + chrono_ttl(ttl),
            acquired_at: now,
            generation,
            operation,
        }
    }

    /// Returns whether the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    fn expired_copy(&self) -> Self {
        Self {
            holder_id: self.holder_id.clone(),
            expires_at: Utc::now() - chrono::Duration::seconds(1),
            acquired_at: self.acquired_at,
            generation: self.generation,
            operation: None,
        }
    }

    fn to_bytes(&self) -> Result<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| Error::serialization(format!("serialize lock: {e}")))
    }
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30))
}

/// A single-writer lock over one catalog table.
pub struct TableLock<S: StorageBackend + ?Sized> {
    storage: Arc<S>,
    lock_path: String,
    holder_id: String,
}

impl<S: StorageBackend + ?Sized> Clone for TableLock<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            lock_path: self.lock_path.clone(),
            holder_id: self.holder_id.clone(),
        }
    }
}

impl<S: StorageBackend + ?Sized> TableLock<S> {
    /// Creates the lock for `namespace.table` with a fresh holder ID.
    #[must_use]
    pub fn for_table(storage: Arc<S>, namespace: &str, table: &str) -> Self {
        Self {
            storage,
            lock_path: CatalogPaths::table_lock(namespace, table),
            holder_id: Ulid::new().to_string(),
        }
    }

    /// Returns the holder ID used by this lock instance.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Returns the storage path of the lock record.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.lock_path
    }

    /// Acquires the lock, retrying up to `max_retries` times.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if another holder kept the lock
    /// through every attempt, or a storage error.
    pub async fn acquire(&self, ttl: Duration, max_retries: u32) -> Result<LockGuard<S>> {
        self.acquire_for(ttl, max_retries, None).await
    }

    /// Acquires the lock and records what the holder is about to do.
    ///
    /// # Errors
    ///
    /// See [`acquire`](Self::acquire).
    pub async fn acquire_for(
        &self,
        ttl: Duration,
        max_retries: u32,
        operation: Option<String>,
    ) -> Result<LockGuard<S>> {
        let mut attempts = 0;
        let mut backoff = BACKOFF_BASE;

        loop {
            match self.try_acquire(ttl, operation.clone()).await? {
                Acquire::Held(guard) => return Ok(guard),
                Acquire::Busy(holder) => {
                    attempts += 1;
                    if attempts >= max_retries.max(1) {
                        return Err(Error::PreconditionFailed {
                            message: format!(
                                "lock {} held by {holder} after {attempts} attempts",
                                self.lock_path
                            ),
                        });
                    }
                    tracing::debug!(lock = %self.lock_path, %holder, attempts, "lock busy, backing off");
                    let delay = backoff.min(BACKOFF_MAX) + Duration::from_millis(rand_jitter());
                    tokio::time::sleep(delay).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    async fn try_acquire(&self, ttl: Duration, operation: Option<String>) -> Result<Acquire<S>> {
        let fresh = LockInfo::new(&self.holder_id, ttl, 1, operation.clone());
        if let WriteResult::Success { version } = self
            .storage
            .put(&self.lock_path, fresh.to_bytes()?, WritePrecondition::DoesNotExist)
            .await?
        {
            return Ok(Acquire::Held(self.guard(version, 1)));
        }

        // The takeover decision must be bound to the version seen by head.
        let Some(meta) = self.storage.head(&self.lock_path).await? else {
            return Ok(Acquire::Busy("vanished".into()));
        };
        let Some(existing) = self.read_lock().await? else {
            return Ok(Acquire::Busy("vanished".into()));
        };
        if !existing.is_expired() {
            return Ok(Acquire::Busy(existing.holder_id));
        }

        let generation = existing.generation.saturating_add(1);
        let takeover = LockInfo::new(&self.holder_id, ttl, generation, operation);
        match self
            .storage
            .put(
                &self.lock_path,
                takeover.to_bytes()?,
                WritePrecondition::MatchesVersion(meta.version),
            )
            .await?
        {
            WriteResult::Success { version } => Ok(Acquire::Held(self.guard(version, generation))),
            WriteResult::PreconditionFailed { .. } => Ok(Acquire::Busy("contended".into())),
        }
    }

    fn guard(&self, version: String, generation: u64) -> LockGuard<S> {
        LockGuard {
            storage: Arc::clone(&self.storage),
            lock_path: self.lock_path.clone(),
            holder_id: self.holder_id.clone(),
            version,
            generation,
            released: false,
        }
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        read_lock_at(self.storage.as_ref(), &self.lock_path).await
    }

    /// Returns whether any holder currently has an unexpired lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock record cannot be read.
    pub async fn is_locked(&self) -> Result<bool> {
        Ok(self.read_lock().await?.is_some_and(|info| !info.is_expired()))
    }

    /// Reads the lock record without acquiring it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock record cannot be read.
    pub async fn inspect(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }
}

async fn read_lock_at<S: StorageBackend + ?Sized>(
    storage: &S,
    path: &str,
) -> Result<Option<LockInfo>> {
    match storage.get(path).await {
        Ok(data) => serde_json::from_slice(&data)
            .map(Some)
            .map_err(|e| Error::serialization(format!("parse lock {path}: {e}"))),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

enum Acquire<S: StorageBackend + ?Sized> {
    Held(LockGuard<S>),
    Busy(String),
}

/// Proof of holding a table lock.
///
/// Dropping the guard without calling [`release`](Self::release) schedules a
/// best-effort release on the current Tokio runtime; without a runtime the
/// TTL eventually frees the lock.
pub struct LockGuard<S: StorageBackend + ?Sized> {
    storage: Arc<S>,
    lock_path: String,
    holder_id: String,
    version: String,
    generation: u64,
    released: bool,
}

impl<S: StorageBackend + ?Sized> LockGuard<S> {
    /// Returns the holder ID.
    #[must_use]
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Returns the acquisition generation. Later holders see larger values.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock record cannot be read or written.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        release_at(
            self.storage.as_ref(),
            &self.lock_path,
            &self.holder_id,
            &self.version,
        )
        .await
    }
}

async fn release_at<S: StorageBackend + ?Sized>(
    storage: &S,
    path: &str,
    holder_id: &str,
    version: &str,
) -> Result<()> {
    let Some(info) = read_lock_at(storage, path).await? else {
        return Ok(());
    };
    if info.holder_id != holder_id {
        return Ok(());
    }
    // Leave the expired record in place; deleting it would race a new holder.
    let _ = storage
        .put(
            path,
            info.expired_copy().to_bytes()?,
            WritePrecondition::MatchesVersion(version.to_string()),
        )
        .await?;
    Ok(())
}

impl<S: StorageBackend + ?Sized> Drop for LockGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let storage = Arc::clone(&self.storage);
        let path = self.lock_path.clone();
        let holder = self.holder_id.clone();
        let version = self.version.clone();
        handle.spawn(async move {
            if let Err(e) = release_at(storage.as_ref(), &path, &holder, &version).await {
                tracing::warn!(lock = %path, error = %e, "failed to release dropped lock");
            }
        });
    }
}

/// Jitter in milliseconds (0-20) derived from the clock.
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    u64::from(nanos) % 20
}
