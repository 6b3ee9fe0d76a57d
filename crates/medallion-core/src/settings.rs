//! Runtime settings read from the environment.
//!
//! Empty variables are treated as unset. Malformed values are errors rather
//! than silently falling back to defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::lock::{DEFAULT_LOCK_TTL, DEFAULT_MAX_RETRIES};
use crate::observability::LogFormat;

/// Default catalog directory, relative to the working directory.
pub const DEFAULT_CATALOG_ROOT: &str = "lakehouse";

/// Runtime settings shared by the catalog, loader and engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Directory holding the catalog objects.
    pub catalog_root: PathBuf,
    /// Log output format.
    pub log_format: LogFormat,
    /// TTL of per-table writer locks.
    pub lock_ttl: Duration,
    /// Attempts to acquire a contended table lock.
    pub lock_max_retries: u32,
    /// Attempts to swing a table pointer when racing another writer.
    pub cas_max_retries: u32,
    /// Maximum tables refreshed concurrently within one stage.
    pub max_parallel_refresh: usize,
    /// Rows sampled from each extract for type inference.
    pub sample_rows: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            catalog_root: PathBuf::from(DEFAULT_CATALOG_ROOT),
            log_format: LogFormat::default(),
            lock_ttl: DEFAULT_LOCK_TTL,
            lock_max_retries: DEFAULT_MAX_RETRIES,
            cas_max_retries: 5,
            max_parallel_refresh: 4,
            sample_rows: 100,
        }
    }
}

impl Settings {
    /// Loads settings from `MEDALLION_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the variable when a value
    /// cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(root) = env_string("MEDALLION_CATALOG_ROOT") {
            settings.catalog_root = PathBuf::from(root);
        }
        if let Some(format) = env_string("MEDALLION_LOG_FORMAT") {
            settings.log_format = format.parse().map_err(|_| {
                Error::InvalidInput(format!(
                    "MEDALLION_LOG_FORMAT must be pretty or json (got {format})"
                ))
            })?;
        }
        if let Some(secs) = env_u64("MEDALLION_LOCK_TTL_SECS")? {
            if secs == 0 {
                return Err(Error::InvalidInput(
                    "MEDALLION_LOCK_TTL_SECS must be greater than zero".into(),
                ));
            }
            settings.lock_ttl = Duration::from_secs(secs);
        }
        if let Some(retries) = env_u32("MEDALLION_LOCK_MAX_RETRIES")? {
            settings.lock_max_retries = retries.max(1);
        }
        if let Some(retries) = env_u32("MEDALLION_CAS_MAX_RETRIES")? {
            settings.cas_max_retries = retries.max(1);
        }
        if let Some(parallel) = env_usize("MEDALLION_MAX_PARALLEL_REFRESH")? {
            settings.max_parallel_refresh = parallel.max(1);
        }
        if let Some(rows) = env_usize("MEDALLION_SAMPLE_ROWS")? {
            settings.sample_rows = rows.max(1);
        }

        Ok(settings)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u32: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}
