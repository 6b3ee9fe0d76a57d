//! Refresh cycle reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medallion_catalog::TableRef;
use medallion_core::id::CycleId;

/// Outcome of one derived table in a refresh cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableStatus {
    /// The rule ran and a new snapshot was committed.
    Recomputed,
    /// Inputs and rule were unchanged; the current snapshot stands.
    SkippedUnchanged,
    /// The rule or its commit failed.
    Failed,
    /// An upstream table failed, so this one was not attempted.
    Blocked,
    /// The cycle was cancelled before this table committed.
    Cancelled,
}

impl TableStatus {
    /// Label used in reports and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recomputed => "recomputed",
            Self::SkippedUnchanged => "skipped-unchanged",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether the table holds a snapshot consistent with its inputs.
    #[must_use]
    pub const fn is_fresh(self) -> bool {
        matches!(self, Self::Recomputed | Self::SkippedUnchanged)
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report entry for one derived table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableReport {
    /// The table.
    pub table: TableRef,
    /// Rule producing it.
    pub rule: String,
    /// Outcome.
    pub status: TableStatus,
    /// Topological stage, starting at 0.
    pub stage: usize,
    /// Table version after the cycle, if the table exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Rows after the cycle, if the table exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Input fingerprint, once computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Machine-readable error kind for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Error message for failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The failed upstream table that blocked this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<TableRef>,
    /// Time spent on the table.
    pub duration_ms: u64,
}

impl TableReport {
    pub(crate) fn pending(table: TableRef, rule: &str, stage: usize) -> Self {
        Self {
            table,
            rule: rule.to_string(),
            status: TableStatus::Blocked,
            stage,
            version: None,
            row_count: None,
            fingerprint: None,
            error_kind: None,
            error: None,
            blocked_by: None,
            duration_ms: 0,
        }
    }
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    /// Tables recomputed.
    pub recomputed: usize,
    /// Tables skipped as unchanged.
    pub skipped_unchanged: usize,
    /// Tables that failed.
    pub failed: usize,
    /// Tables blocked by an upstream failure.
    pub blocked: usize,
    /// Tables not committed because the cycle was cancelled.
    pub cancelled: usize,
}

impl RefreshSummary {
    /// Tallies a list of entries.
    #[must_use]
    pub fn of(tables: &[TableReport]) -> Self {
        let mut summary = Self::default();
        for entry in tables {
            match entry.status {
                TableStatus::Recomputed => summary.recomputed += 1,
                TableStatus::SkippedUnchanged => summary.skipped_unchanged += 1,
                TableStatus::Failed => summary.failed += 1,
                TableStatus::Blocked => summary.blocked += 1,
                TableStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    /// Cycle identifier, also the `cycle_id` of the refresh span.
    pub cycle_id: CycleId,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the cycle finished.
    pub finished_at: DateTime<Utc>,
    /// Whether cancellation was requested during the cycle.
    pub cancelled: bool,
    /// One entry per derived table, in topological order.
    pub tables: Vec<TableReport>,
    /// Counts per status.
    pub summary: RefreshSummary,
}

impl RefreshReport {
    /// The entry for a table.
    #[must_use]
    pub fn entry(&self, table: &TableRef) -> Option<&TableReport> {
        self.tables.iter().find(|t| &t.table == table)
    }

    /// The status of a table, if it is derived.
    #[must_use]
    pub fn status_of(&self, table: &TableRef) -> Option<TableStatus> {
        self.entry(table).map(|t| t.status)
    }

    /// Whether every table ended fresh.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.tables.iter().all(|t| t.status.is_fresh())
    }

    /// Renders the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
