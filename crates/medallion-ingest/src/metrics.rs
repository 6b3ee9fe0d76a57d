//! Bronze load metrics.

use metrics::{counter, describe_counter};

/// Bronze mappings processed, labelled by `status`.
pub const BRONZE_LOADS: &str = "medallion_bronze_loads_total";

/// Registers metric descriptions. Call once after installing a recorder.
pub fn register_metrics() {
    describe_counter!(BRONZE_LOADS, "Total bronze extract mappings processed");
}

/// Records one processed mapping.
pub fn record_load(status: &'static str) {
    counter!(BRONZE_LOADS, "status" => status).increment(1);
}
