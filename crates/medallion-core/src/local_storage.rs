//! Durable storage backend over a local directory.
//!
//! Objects map to files below a root directory. Writes go to a temporary
//! sibling file that is synced to disk, then renamed into place and the
//! directory synced, so a write that returned survives a crash and a reader
//! sees either the old or the new object, never a torn one. The version token is the SHA-256
//! of the object's content.
//!
//! Conditional writes are serialized by an in-process mutex. The backend is
//! meant for a single writing process per catalog directory; concurrent
//! writers in other processes are still fenced by the catalog's lock files
//! but not by this mutex.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::storage::{ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

const TEMP_MARKER: &str = ".tmp-";

/// Storage backend rooted at a local directory.
#[derive(Debug)]
pub struct LocalFsBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFsBackend {
    /// Creates a backend rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            Error::storage_with_source(format!("create catalog root {}", root.display()), e)
        })?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !safe {
            return Err(Error::InvalidInput(format!("invalid object path: {path}")));
        }
        Ok(self.root.join(relative))
    }

    async fn current_version(&self, file: &Path) -> Result<Option<String>> {
        match tokio::fs::read(file).await {
            Ok(data) => Ok(Some(content_version(&data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(
                format!("read {}", file.display()),
                e,
            )),
        }
    }

    async fn meta_for(&self, path: &str, file: &Path) -> Result<Option<ObjectMeta>> {
        let data = match tokio::fs::read(file).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::storage_with_source(
                    format!("read {}", file.display()),
                    e,
                ));
            }
        };
        let last_modified = tokio::fs::metadata(file)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        Ok(Some(ObjectMeta {
            path: path.to_string(),
            size: data.len() as u64,
            version: content_version(&data),
            last_modified,
        }))
    }
}

fn content_version(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[async_trait]
impl StorageBackend for LocalFsBackend {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object not found: {path}")))
            }
            Err(e) => Err(Error::storage_with_source(format!("read {path}"), e)),
        }
    }

    async fn put(
        &self,
        path: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let file = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;

        let current = self.current_version(&file).await?;
        match (&precondition, &current) {
            (WritePrecondition::DoesNotExist, Some(version)) => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: version.clone(),
                });
            }
            (WritePrecondition::MatchesVersion(expected), Some(version)) if expected != version => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: version.clone(),
                });
            }
            (WritePrecondition::MatchesVersion(_), None) => {
                return Ok(WriteResult::PreconditionFailed {
                    current_version: String::new(),
                });
            }
            _ => {}
        }

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage_with_source(format!("create dirs for {path}"), e))?;
        }

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = file.with_file_name(format!("{file_name}{TEMP_MARKER}{}", Ulid::new()));
        if let Err(e) = write_synced(&temp, &data).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::storage_with_source(format!("write {path}"), e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &file).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(Error::storage_with_source(format!("publish {path}"), e));
        }
        if let Some(parent) = file.parent() {
            sync_dir(parent)
                .await
                .map_err(|e| Error::storage_with_source(format!("sync directory of {path}"), e))?;
        }

        Ok(WriteResult::Success {
            version: content_version(&data),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.resolve(path)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(format!("delete {path}"), e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut results = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(Error::storage_with_source(
                        format!("list {}", dir.display()),
                        e,
                    ));
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| Error::storage_with_source(format!("list {}", dir.display()), e))?
            {
                let entry_path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| Error::storage_with_source("inspect directory entry", e))?;
                if file_type.is_dir() {
                    pending.push(entry_path);
                    continue;
                }

                let Ok(relative) = entry_path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.contains(TEMP_MARKER) || !key.starts_with(prefix) {
                    continue;
                }
                if let Some(meta) = self.meta_for(&key, &entry_path).await? {
                    results.push(meta);
                }
            }
        }

        Ok(results)
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let file = self.resolve(path)?;
        self.meta_for(path, &file).await
    }
}

/// Writes `data` to a new file at `path` and flushes it to disk.
async fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}

/// Flushes a directory entry so a completed rename survives a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
