//! Pre-built test fixtures for common test scenarios.
//!
//! Provides a catalog over traced storage, a temporary directory of raw
//! extracts, and generators for the Ondoriya-style sample files.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use medallion_catalog::name::TableRef;
use medallion_catalog::rows::MemoryRows;
use medallion_catalog::schema::{Column, Row, Schema};
use medallion_catalog::snapshot::TablePointer;
use medallion_catalog::store::{CatalogStore, StoreOptions};
use medallion_catalog::value::DataType;
use tempfile::TempDir;

use crate::storage::TracingMemoryBackend;

/// Factions used by the generated extracts.
pub const FACTIONS: [&str; 3] = ["azure_pact", "ember_court", "verdant_league"];

/// Density tiers used by the generated regions.
pub const DENSITY_TIERS: [&str; 3] = ["sparse", "settled", "dense"];

/// Biomes used by the generated region biome mapping.
pub const BIOMES: [&str; 4] = ["steppe", "taiga", "coast", "highland"];

/// A catalog store over traced in-memory storage, with the three medallion
/// namespaces already created.
pub struct TestCatalog {
    /// Traced storage under the store.
    pub storage: Arc<TracingMemoryBackend>,
    /// The store.
    pub store: Arc<CatalogStore>,
}

impl TestCatalog {
    /// Creates a catalog with `bronze`, `silver` and `gold` namespaces.
    pub async fn new() -> Self {
        Self::with_options(StoreOptions::default()).await
    }

    /// Creates a catalog with custom write coordination options.
    pub async fn with_options(options: StoreOptions) -> Self {
        let storage = Arc::new(TracingMemoryBackend::new());
        let store = CatalogStore::open(storage.clone(), options)
            .await
            .expect("open catalog");
        for ns in ["bronze", "silver", "gold"] {
            store.create_namespace(ns).await.expect("create namespace");
        }
        Self {
            storage,
            store: Arc::new(store),
        }
    }

    /// Commits `rows` as the first snapshot of `table`.
    pub async fn seed(&self, table: &str, schema: Schema, rows: Vec<Row>) -> TablePointer {
        self.store
            .create_table_if_absent(&table_ref(table), None, MemoryRows::new(schema, rows).boxed())
            .await
            .expect("seed table")
            .pointer()
            .clone()
    }
}

/// Parses a `namespace.table` reference.
pub fn table_ref(qualified: &str) -> TableRef {
    qualified.parse().expect("valid table reference")
}

/// Builds a schema from `(name, type)` pairs.
pub fn schema(columns: &[(&str, DataType)]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|(name, ty)| Column::new(*name, *ty))
            .collect(),
    )
    .expect("valid schema")
}

/// A temporary directory of raw extract files.
pub struct ExtractDir {
    dir: TempDir,
}

impl ExtractDir {
    /// Creates an empty directory, removed on drop.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    /// Directory root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file relative to the root, creating parent directories.
    pub fn write(&self, relative: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create extract dir");
        }
        std::fs::write(&path, contents).expect("write extract");
        path
    }

    /// Writes the four Ondoriya extracts under their usual subdirectories.
    pub fn write_ondoriya(&self, regions: usize, people: usize) {
        self.write("political_geography/regions.csv", &regions_csv(regions));
        self.write(
            "political_geography/region_biome.csv",
            &region_biome_csv(regions),
        );
        self.write(
            "political_geography/faction_distribution.csv",
            &faction_distribution_csv(regions),
        );
        self.write(
            "core_demographics/people.csv",
            &people_csv(people, regions),
        );
    }
}

impl Default for ExtractDir {
    fn default() -> Self {
        Self::new()
    }
}

/// `regions.csv` with `n` regions.
pub fn regions_csv(n: usize) -> String {
    let mut out = String::from("region_id,ancient_name,current_faction,density_tier\n");
    for i in 1..=n {
        let _ = writeln!(
            out,
            "{i},Region {i},{},{}",
            FACTIONS[i % FACTIONS.len()],
            DENSITY_TIERS[i % DENSITY_TIERS.len()]
        );
    }
    out
}

/// `region_biome.csv` assigning one biome to each of `n` regions.
pub fn region_biome_csv(n: usize) -> String {
    let mut out = String::from("region_id,biome\n");
    for i in 1..=n {
        let _ = writeln!(out, "{i},{}", BIOMES[i % BIOMES.len()]);
    }
    out
}

/// `faction_distribution.csv` with one share row per faction and region.
pub fn faction_distribution_csv(n: usize) -> String {
    let mut out = String::from("region_id,faction,share_pct\n");
    for i in 1..=n {
        for (f, faction) in FACTIONS.iter().enumerate() {
            let share = if i % FACTIONS.len() == f { 60.0 } else { 20.0 };
            let _ = writeln!(out, "{i},{faction},{share:.1}");
        }
    }
    out
}

/// `people.csv` with `n` people spread over `regions` regions.
///
/// Every seventh person has no recorded age and every eleventh has no
/// region, so completeness figures are below 100%.
pub fn people_csv(n: usize, regions: usize) -> String {
    let mut out = String::from("person_id,given_name,age,current_region_id,current_faction\n");
    for i in 1..=n {
        let age = if i % 7 == 0 {
            String::new()
        } else {
            (18 + (i * 13) % 63).to_string()
        };
        let region = if i % 11 == 0 || regions == 0 {
            String::new()
        } else {
            ((i % regions) + 1).to_string()
        };
        let _ = writeln!(
            out,
            "{i},Person {i},{age},{region},{}",
            FACTIONS[i % FACTIONS.len()]
        );
    }
    out
}
