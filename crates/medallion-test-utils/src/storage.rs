//! Test storage with operation tracing and fault injection.
//!
//! [`TracingMemoryBackend`] records every call for later assertions and can
//! be told to fail paths outright or to lose conditional writes as if a
//! concurrent writer got there first.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use medallion_core::error::{Error, Result};
use medallion_core::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Path that was read.
        path: String,
    },
    /// Head operation (metadata only).
    Head {
        /// Path that was checked.
        path: String,
    },
    /// Put operation.
    Put {
        /// Path that was written.
        path: String,
        /// Size of data written.
        size: usize,
        /// Precondition used.
        precondition: WritePrecondition,
    },
    /// Delete operation.
    Delete {
        /// Path that was deleted.
        path: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
}

impl StorageOp {
    /// Operation name: `get`, `head`, `put`, `delete` or `list`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Head { .. } => "head",
            Self::Put { .. } => "put",
            Self::Delete { .. } => "delete",
            Self::List { .. } => "list",
        }
    }

    /// Path or prefix the operation touched.
    pub fn path(&self) -> &str {
        match self {
            Self::Get { path }
            | Self::Head { path }
            | Self::Put { path, .. }
            | Self::Delete { path }
            | Self::List { prefix: path } => path,
        }
    }
}

/// In-memory storage backend with operation tracing.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    data: Arc<Mutex<HashMap<String, StoredObject>>>,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_paths: Arc<Mutex<Vec<String>>>,
    cas_conflicts: Arc<Mutex<Vec<(String, u32)>>>,
    latency: Option<Duration>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates storage with simulated latency on every call.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes every operation on paths with this prefix fail.
    pub fn inject_failure(&self, prefix: impl Into<String>) {
        self.fail_paths.lock().expect("lock").push(prefix.into());
    }

    /// Clears all injected failures and pending CAS conflicts.
    pub fn clear_failures(&self) {
        self.fail_paths.lock().expect("lock").clear();
        self.cas_conflicts.lock().expect("lock").clear();
    }

    /// Makes the next `count` conditional writes under `prefix` lose.
    ///
    /// Each lost write also bumps the stored object's version, exactly as if
    /// another writer had rewritten it in between.
    pub fn inject_cas_conflicts(&self, prefix: impl Into<String>, count: u32) {
        self.cas_conflicts
            .lock()
            .expect("lock")
            .push((prefix.into(), count));
    }

    /// Returns the current version for a path.
    #[must_use]
    pub fn version(&self, path: &str) -> Option<String> {
        self.data
            .lock()
            .expect("lock")
            .get(path)
            .map(|o| o.version.to_string())
    }

    /// Returns all stored paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.data.lock().expect("lock").keys().cloned().collect();
        paths.sort();
        paths
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, path: &str) -> Result<()> {
        let fail_paths = self.fail_paths.lock().expect("lock");
        if fail_paths.iter().any(|p| path.starts_with(p)) {
            return Err(Error::Internal {
                message: format!("Injected failure for path: {path}"),
            });
        }
        Ok(())
    }

    fn take_cas_conflict(&self, path: &str) -> bool {
        let mut conflicts = self.cas_conflicts.lock().expect("lock");
        let Some(entry) = conflicts
            .iter_mut()
            .find(|(prefix, remaining)| *remaining > 0 && path.starts_with(prefix.as_str()))
        else {
            return false;
        };
        entry.1 -= 1;
        true
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Get {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        data.get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Head {
            path: path.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data.get(path).map(|o| ObjectMeta {
            path: path.to_string(),
            size: o.data.len() as u64,
            version: o.version.to_string(),
            last_modified: Some(o.last_modified),
        }))
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Put {
            path: path.to_string(),
            size: data.len(),
            precondition: precondition.clone(),
        });

        let conflicted =
            precondition != WritePrecondition::None && self.take_cas_conflict(path);
        let mut store = self.data.lock().expect("lock");

        if conflicted {
            let current = store.get_mut(path).map(|obj| {
                obj.version += 1;
                obj.last_modified = Utc::now();
                obj.version
            });
            return Ok(WriteResult::PreconditionFailed {
                current_version: current.unwrap_or(0).to_string(),
            });
        }

        let existing = store.get(path);
        match &precondition {
            WritePrecondition::None => {}
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = existing {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match existing {
                    Some(obj) if obj.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: obj.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
        }

        let new_version = existing.map_or(1, |o| o.version + 1);
        store.insert(
            path.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(path)?;
        self.record(StorageOp::Delete {
            path: path.to_string(),
        });

        self.data.lock().expect("lock").remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.maybe_delay().await;
        self.check_failure(prefix)?;
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });

        let data = self.data.lock().expect("lock");
        Ok(data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectMeta {
                path: k.clone(),
                size: v.data.len() as u64,
                version: v.version.to_string(),
                last_modified: Some(v.last_modified),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tracing_storage_records_operations() {
        let storage = TracingMemoryBackend::new();

        storage
            .put("test.txt", Bytes::from("hello"), WritePrecondition::None)
            .await
            .expect("put");
        let _ = storage.get("test.txt").await;
        let _ = storage.list("").await;

        let ops = storage.operations();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].kind(), "put");
        assert_eq!(ops[1].kind(), "get");
        assert_eq!(ops[2].kind(), "list");
    }

    #[tokio::test]
    async fn tracing_storage_failure_injection() {
        let storage = TracingMemoryBackend::new();
        storage.inject_failure("fail/");

        assert!(storage.get("fail/test.txt").await.is_err());

        storage
            .put("ok/test.txt", Bytes::from("data"), WritePrecondition::None)
            .await
            .expect("put");
        assert!(storage.get("ok/test.txt").await.is_ok());
    }

    #[tokio::test]
    async fn injected_cas_conflict_bumps_version_once() {
        let storage = TracingMemoryBackend::new();
        storage
            .put("p.json", Bytes::from("v1"), WritePrecondition::DoesNotExist)
            .await
            .expect("put");
        storage.inject_cas_conflicts("p.json", 1);

        let lost = storage
            .put(
                "p.json",
                Bytes::from("v2"),
                WritePrecondition::MatchesVersion("1".into()),
            )
            .await
            .expect("put");
        assert_eq!(
            lost,
            WriteResult::PreconditionFailed {
                current_version: "2".into()
            }
        );

        let won = storage
            .put(
                "p.json",
                Bytes::from("v2"),
                WritePrecondition::MatchesVersion("2".into()),
            )
            .await
            .expect("put");
        assert!(won.is_success());
    }
}
