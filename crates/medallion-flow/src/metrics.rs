//! Refresh engine metrics.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `medallion_refresh_tables_total` | Counter | `status` | Tables processed per refresh outcome |
//! | `medallion_refresh_table_duration_seconds` | Histogram | `status` | Time spent per table |
//! | `medallion_refresh_cycle_duration_seconds` | Histogram | - | Time spent per refresh cycle |
//! | `medallion_refresh_tables_in_flight` | Gauge | - | Tables currently being refreshed |
//!
//! Metrics go through the `metrics` facade; an embedding binary installs
//! the exporter.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: tables processed, by status.
    pub const REFRESH_TABLES_TOTAL: &str = "medallion_refresh_tables_total";
    /// Histogram: per-table refresh duration in seconds.
    pub const REFRESH_TABLE_DURATION_SECONDS: &str = "medallion_refresh_table_duration_seconds";
    /// Histogram: whole-cycle duration in seconds.
    pub const REFRESH_CYCLE_DURATION_SECONDS: &str = "medallion_refresh_cycle_duration_seconds";
    /// Gauge: tables currently being refreshed.
    pub const REFRESH_TABLES_IN_FLIGHT: &str = "medallion_refresh_tables_in_flight";
}

/// Label keys.
pub mod labels {
    /// Refresh outcome of a table.
    pub const STATUS: &str = "status";
}

/// Registers metric descriptions. Call once after installing a recorder.
pub fn register_metrics() {
    describe_counter!(
        names::REFRESH_TABLES_TOTAL,
        "Total derived tables processed by refresh cycles"
    );
    describe_histogram!(
        names::REFRESH_TABLE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent refreshing one table"
    );
    describe_histogram!(
        names::REFRESH_CYCLE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Time spent on one refresh cycle"
    );
    describe_gauge!(
        names::REFRESH_TABLES_IN_FLIGHT,
        "Derived tables currently being refreshed"
    );
}

/// Recorder for refresh metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowMetrics;

impl FlowMetrics {
    /// Creates a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records one processed table.
    pub fn record_table(&self, status: &'static str, duration: Duration) {
        counter!(names::REFRESH_TABLES_TOTAL, labels::STATUS => status).increment(1);
        histogram!(names::REFRESH_TABLE_DURATION_SECONDS, labels::STATUS => status)
            .record(duration.as_secs_f64());
    }

    /// Records a finished cycle.
    pub fn observe_cycle_duration(&self, duration: Duration) {
        histogram!(names::REFRESH_CYCLE_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Marks a table as started.
    pub fn table_started(&self) {
        gauge!(names::REFRESH_TABLES_IN_FLIGHT).increment(1.0);
    }

    /// Marks a table as finished.
    pub fn table_finished(&self) {
        gauge!(names::REFRESH_TABLES_IN_FLIGHT).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        register_metrics();
        let metrics = FlowMetrics::new();
        metrics.table_started();
        metrics.record_table("recomputed", Duration::from_millis(12));
        metrics.table_finished();
        metrics.observe_cycle_duration(Duration::from_secs(1));
    }
}
