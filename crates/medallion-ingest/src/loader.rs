//! Bronze loader: raw extracts into bronze tables, create-if-absent.
//!
//! Mappings load in declared order. A mapping whose table already exists is
//! reported `already-present` without touching its source file, unless its
//! declared schema conflicts with the stored one. A failing mapping is
//! reported `failed` and the loader moves on to the next one.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::Instrument;

use medallion_catalog::error::CatalogError;
use medallion_catalog::name::TableRef;
use medallion_catalog::schema::Schema;
use medallion_catalog::store::{CatalogStore, CreateOutcome};
use medallion_core::observability::catalog_span;
use medallion_core::settings::Settings;

use crate::extract::{ExtractError, ExtractOptions, extract_error, open_extract};
use crate::metrics::record_load;

/// One extract to bronze table mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractMapping {
    /// Target table, normally in the `bronze` namespace.
    pub table: TableRef,
    /// Extract file.
    pub source: PathBuf,
    /// Declared schema; inferred from the extract when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
}

impl ExtractMapping {
    /// Creates a mapping with an inferred schema.
    #[must_use]
    pub fn new(table: TableRef, source: impl Into<PathBuf>) -> Self {
        Self {
            table,
            source: source.into(),
            schema: None,
        }
    }

    /// Resolves a relative source path against `base`.
    #[must_use]
    pub fn resolved_against(mut self, base: &Path) -> Self {
        if self.source.is_relative() {
            self.source = base.join(&self.source);
        }
        self
    }
}

/// Outcome of one mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStatus {
    /// The table was created from the extract.
    Created,
    /// The table already existed; the extract was not read.
    AlreadyPresent,
    /// The mapping failed; see the error.
    Failed,
}

impl LoadStatus {
    /// Label used in reports and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AlreadyPresent => "already-present",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report entry for one mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingReport {
    /// Target table.
    pub table: TableRef,
    /// Extract file.
    pub source: PathBuf,
    /// Outcome.
    pub status: LoadStatus,
    /// Table version after the mapping, if the table exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Rows in the table after the mapping, if the table exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Machine-readable error kind for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error message for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time spent on the mapping.
    pub duration_ms: u64,
}

/// Per-mapping results of a bronze load, in declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    /// One entry per mapping.
    pub mappings: Vec<MappingReport>,
}

impl LoadReport {
    fn count(&self, status: LoadStatus) -> usize {
        self.mappings.iter().filter(|m| m.status == status).count()
    }

    /// Mappings that created their table.
    #[must_use]
    pub fn created(&self) -> usize {
        self.count(LoadStatus::Created)
    }

    /// Mappings whose table already existed.
    #[must_use]
    pub fn already_present(&self) -> usize {
        self.count(LoadStatus::AlreadyPresent)
    }

    /// Mappings that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(LoadStatus::Failed)
    }

    /// Whether no mapping failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// The entry for a table.
    #[must_use]
    pub fn entry(&self, table: &TableRef) -> Option<&MappingReport> {
        self.mappings.iter().find(|m| &m.table == table)
    }
}

/// Loads raw extracts into bronze tables.
#[derive(Debug, Clone)]
pub struct BronzeLoader {
    store: Arc<CatalogStore>,
    options: ExtractOptions,
}

impl BronzeLoader {
    /// Creates a loader writing into `store`.
    #[must_use]
    pub fn new(store: Arc<CatalogStore>, options: ExtractOptions) -> Self {
        Self { store, options }
    }

    /// Creates a loader using the sample size from settings.
    #[must_use]
    pub fn from_settings(store: Arc<CatalogStore>, settings: &Settings) -> Self {
        Self::new(
            store,
            ExtractOptions {
                sample_rows: settings.sample_rows,
                ..ExtractOptions::default()
            },
        )
    }

    /// Loads every mapping in order. Never fails as a whole.
    pub async fn load(&self, mappings: &[ExtractMapping]) -> LoadReport {
        let mut report = LoadReport::default();
        for mapping in mappings {
            let span = catalog_span("bronze_load", &mapping.table.to_string());
            report
                .mappings
                .push(self.load_one(mapping).instrument(span).await);
        }
        tracing::info!(
            created = report.created(),
            already_present = report.already_present(),
            failed = report.failed(),
            "bronze load finished"
        );
        report
    }

    /// Loads one mapping.
    pub async fn load_one(&self, mapping: &ExtractMapping) -> MappingReport {
        let started = Instant::now();
        let outcome = self.try_load(mapping).await;
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let entry = match outcome {
            Ok(outcome) => {
                let status = if outcome.was_created() {
                    LoadStatus::Created
                } else {
                    LoadStatus::AlreadyPresent
                };
                let pointer = outcome.pointer();
                tracing::info!(
                    source = %mapping.source.display(),
                    %status,
                    version = pointer.version,
                    rows = pointer.row_count,
                    "bronze mapping loaded"
                );
                MappingReport {
                    table: mapping.table.clone(),
                    source: mapping.source.clone(),
                    status,
                    version: Some(pointer.version),
                    row_count: Some(pointer.row_count),
                    error_kind: None,
                    error: None,
                    duration_ms,
                }
            }
            Err(error) => {
                let kind = extract_error(&error).map_or(error.kind(), ExtractError::kind);
                tracing::warn!(
                    source = %mapping.source.display(),
                    kind,
                    %error,
                    "bronze mapping failed"
                );
                MappingReport {
                    table: mapping.table.clone(),
                    source: mapping.source.clone(),
                    status: LoadStatus::Failed,
                    version: None,
                    row_count: None,
                    error_kind: Some(kind.to_string()),
                    error: Some(error.to_string()),
                    duration_ms,
                }
            }
        };
        record_load(entry.status.as_str());
        entry
    }

    async fn try_load(&self, mapping: &ExtractMapping) -> Result<CreateOutcome, CatalogError> {
        if let Some(pointer) = self.store.table_pointer(&mapping.table).await? {
            pointer.check_declared(mapping.schema.as_ref())?;
            return Ok(CreateOutcome::Existing(pointer));
        }
        let extract = open_extract(&mapping.source, self.options).map_err(ExtractError::into_catalog)?;
        self.store
            .create_table_if_absent(&mapping.table, mapping.schema.as_ref(), Box::new(extract))
            .await
    }
}

/// Readiness of one extract source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SourceStatus {
    /// Present, non-empty, with a parseable header and sample.
    Ready {
        /// File size.
        bytes: u64,
        /// Columns in the header.
        columns: usize,
    },
    /// The file does not exist.
    Missing,
    /// The file has zero length.
    Empty,
    /// The header or sample is malformed.
    Malformed {
        /// What is wrong.
        message: String,
    },
}

/// Readiness check of one mapping's source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCheck {
    /// Target table.
    pub table: TableRef,
    /// Extract file.
    pub source: PathBuf,
    /// Result of the check.
    #[serde(flatten)]
    pub status: SourceStatus,
}

/// Readiness of every source, in declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    /// One check per mapping.
    pub checks: Vec<SourceCheck>,
}

impl PreflightReport {
    /// Whether every source is ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.checks
            .iter()
            .all(|c| matches!(c.status, SourceStatus::Ready { .. }))
    }
}

/// Checks that every source exists, is non-empty and has a readable header.
///
/// Only the header and the type sample are read.
#[must_use]
pub fn preflight(mappings: &[ExtractMapping], options: ExtractOptions) -> PreflightReport {
    let checks = mappings
        .iter()
        .map(|mapping| {
            let status = match open_extract(&mapping.source, options).and_then(|e| {
                let schema = e.inspect()?;
                Ok((e.size(), schema.len()))
            }) {
                Ok((bytes, columns)) => SourceStatus::Ready { bytes, columns },
                Err(ExtractError::Missing { .. }) => SourceStatus::Missing,
                Err(ExtractError::Empty { .. }) => SourceStatus::Empty,
                Err(other) => SourceStatus::Malformed {
                    message: other.to_string(),
                },
            };
            SourceCheck {
                table: mapping.table.clone(),
                source: mapping.source.clone(),
                status,
            }
        })
        .collect();
    PreflightReport { checks }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_sources_resolve_against_base() {
        let mapping = ExtractMapping::new(
            "bronze.people".parse().unwrap(),
            "core_demographics/people.csv",
        )
        .resolved_against(Path::new("/data"));
        assert_eq!(mapping.source, PathBuf::from("/data/core_demographics/people.csv"));

        let absolute = ExtractMapping::new("bronze.people".parse().unwrap(), "/abs/people.csv")
            .resolved_against(Path::new("/data"));
        assert_eq!(absolute.source, PathBuf::from("/abs/people.csv"));
    }

    #[test]
    fn report_counts_by_status() {
        let entry = |name: &str, status| MappingReport {
            table: format!("bronze.{name}").parse().unwrap(),
            source: PathBuf::from(format!("{name}.csv")),
            status,
            version: None,
            row_count: None,
            error_kind: None,
            error: None,
            duration_ms: 0,
        };
        let report = LoadReport {
            mappings: vec![
                entry("a", LoadStatus::Created),
                entry("b", LoadStatus::AlreadyPresent),
                entry("c", LoadStatus::Failed),
            ],
        };
        assert_eq!(
            (report.created(), report.already_present(), report.failed()),
            (1, 1, 1)
        );
        assert!(!report.is_success());
    }

    #[test]
    fn mapping_deserializes_with_optional_schema() {
        let mapping: ExtractMapping = serde_json::from_str(
            r#"{"table": "bronze.regions", "source": "regions.csv",
                "schema": [{"name": "region_id", "type": "integer"}]}"#,
        )
        .unwrap();
        assert_eq!(mapping.schema.unwrap().len(), 1);
    }
}
