//! End-to-end runs of the Ondoriya demo pipeline on a local catalog.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;
use std::sync::Arc;

use medallion_catalog::aggregate::{AggregateFunc, AggregateSpec};
use medallion_catalog::value::Value;
use medallion_catalog::{CatalogStore, SnapshotHandle, StoreOptions};
use medallion_flow::prelude::*;
use medallion_ingest::LoadStatus;
use medallion_test_utils::{ExtractDir, table_ref};

const DEFINITION: &str = include_str!("../../../demos/ondoriya/pipeline.json");

async fn local_store(root: &Path) -> Arc<CatalogStore> {
    Arc::new(
        CatalogStore::open_local(root, StoreOptions::default())
            .await
            .unwrap(),
    )
}

fn sum(handle: &SnapshotHandle, column: &str) -> Value {
    handle
        .aggregate(None, &[], &[AggregateSpec::over("total", AggregateFunc::Sum, column)])
        .unwrap()
        .scalar("total")
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn generated_extracts_run_end_to_end_then_skip() {
    let extracts = ExtractDir::new();
    extracts.write_ondoriya(50, 400);
    let catalog = tempfile::tempdir().unwrap();
    let store = local_store(catalog.path()).await;

    let definition =
        PipelineDefinition::parse(DEFINITION, &extracts.path().join("pipeline.json")).unwrap();
    let pipeline = Pipeline::new(store.clone(), definition).unwrap();
    let cancel = CancellationToken::new();

    let first = pipeline.run(&cancel).await.unwrap();
    assert!(first.is_success(), "{first:#?}");
    assert_eq!(first.namespaces_created, vec!["bronze", "silver", "gold"]);
    assert_eq!(first.load.created(), 4);
    assert_eq!(first.refresh.summary.recomputed, 4);

    let regional = store
        .read_snapshot(&table_ref("gold.mart_regional_analytics"))
        .await
        .unwrap();
    assert_eq!(regional.row_count(), 50);
    assert_eq!(
        regional.schema().column_names(),
        vec![
            "ancient_name",
            "current_faction",
            "density_tier",
            "biome",
            "total_population",
            "avg_age"
        ]
    );
    // Every eleventh person has no region and joins nowhere.
    assert_eq!(sum(&regional, "total_population"), Value::Integer(364));

    let factions = store
        .read_snapshot(&table_ref("gold.mart_faction_analytics"))
        .await
        .unwrap();
    assert_eq!(factions.row_count(), 3);
    assert_eq!(sum(&factions, "total_population"), Value::Integer(400));

    let share = store
        .read_snapshot(&table_ref("gold.mart_faction_share"))
        .await
        .unwrap();
    assert_eq!(sum(&share, "dominant_regions"), Value::Integer(50));

    let second = pipeline.run(&cancel).await.unwrap();
    assert!(second.namespaces_created.is_empty());
    assert_eq!(second.load.already_present(), 4);
    assert_eq!(
        second.refresh.status_of(&table_ref("gold.mart_regional_analytics")),
        Some(TableStatus::SkippedUnchanged)
    );
    assert_eq!(second.refresh.summary.skipped_unchanged, 4);

    let forced = pipeline.clone().with_refresh_options(RefreshOptions {
        force: true,
        ..RefreshOptions::default()
    });
    let report = forced.refresh(&cancel).await.unwrap();
    assert_eq!(report.summary.recomputed, 4);
    let again = store
        .read_snapshot(&table_ref("gold.mart_regional_analytics"))
        .await
        .unwrap();
    assert_eq!(again.version(), regional.version() + 1);
    assert_eq!(again.content_hash(), regional.content_hash());
}

#[tokio::test]
async fn state_survives_reopening_the_catalog() {
    let extracts = ExtractDir::new();
    extracts.write_ondoriya(12, 60);
    let catalog = tempfile::tempdir().unwrap();
    let definition =
        PipelineDefinition::parse(DEFINITION, &extracts.path().join("pipeline.json")).unwrap();

    {
        let store = local_store(catalog.path()).await;
        let pipeline = Pipeline::new(store.clone(), definition.clone()).unwrap();
        assert!(pipeline.run(&CancellationToken::new()).await.unwrap().is_success());
        store.close();
    }

    let store = local_store(catalog.path()).await;
    let pipeline = Pipeline::new(store, definition).unwrap();
    let report = pipeline.run(&CancellationToken::new()).await.unwrap();
    assert!(report.is_success(), "{report:#?}");
    assert_eq!(report.refresh.summary.skipped_unchanged, 4);
}

#[tokio::test]
async fn missing_extract_fails_its_mapping_and_blocks_downstream() {
    let extracts = ExtractDir::new();
    extracts.write_ondoriya(10, 40);
    std::fs::remove_file(extracts.path().join("core_demographics/people.csv")).unwrap();
    let catalog = tempfile::tempdir().unwrap();
    let store = local_store(catalog.path()).await;

    let definition =
        PipelineDefinition::parse(DEFINITION, &extracts.path().join("pipeline.json")).unwrap();
    let pipeline = Pipeline::new(store, definition).unwrap();

    let preflight = pipeline.preflight();
    assert!(!preflight.is_ready());

    let report = pipeline.run(&CancellationToken::new()).await.unwrap();
    let people = report.load.entry(&table_ref("bronze.people")).unwrap();
    assert_eq!(people.status, LoadStatus::Failed);
    assert_eq!(report.load.created(), 3);

    assert_eq!(
        report.refresh.status_of(&table_ref("silver.stg_regions")),
        Some(TableStatus::Recomputed)
    );
    for table in ["gold.mart_regional_analytics", "gold.mart_faction_analytics"] {
        assert_eq!(
            report.refresh.status_of(&table_ref(table)),
            Some(TableStatus::Failed),
            "{table}"
        );
    }
    assert!(!report.is_success());
}

#[tokio::test]
async fn bundled_demo_extracts_load() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/ondoriya/pipeline.json");
    let definition = PipelineDefinition::load(&path).unwrap();
    let catalog = tempfile::tempdir().unwrap();
    let store = local_store(catalog.path()).await;
    let pipeline = Pipeline::new(store.clone(), definition).unwrap();
    assert!(pipeline.preflight().is_ready());

    let report = pipeline.run(&CancellationToken::new()).await.unwrap();
    assert!(report.is_success(), "{report:#?}");

    // Headers such as "Region ID" are normalized on load.
    let regions = store.read_snapshot(&table_ref("bronze.regions")).await.unwrap();
    assert_eq!(regions.schema().column_names()[0], "region_id");
    let regional = store
        .read_snapshot(&table_ref("gold.mart_regional_analytics"))
        .await
        .unwrap();
    assert_eq!(regional.row_count(), 8);
}
