//! Bronze load idempotency and failure containment.

use medallion_catalog::value::DataType;
use medallion_ingest::loader::SourceStatus;
use medallion_ingest::prelude::*;
use medallion_test_utils::{ExtractDir, TestCatalog, assert_storage_ops_exclude, schema, table_ref};

fn ondoriya_mappings(dir: &ExtractDir) -> Vec<ExtractMapping> {
    [
        ("bronze.people", "core_demographics/people.csv"),
        ("bronze.regions", "political_geography/regions.csv"),
        ("bronze.region_biome", "political_geography/region_biome.csv"),
        (
            "bronze.faction_distribution",
            "political_geography/faction_distribution.csv",
        ),
    ]
    .into_iter()
    .map(|(table, source)| ExtractMapping::new(table_ref(table), source).resolved_against(dir.path()))
    .collect()
}

#[tokio::test]
async fn second_load_is_a_no_op_that_never_reads_sources() {
    let ctx = TestCatalog::new().await;
    let dir = ExtractDir::new();
    dir.write_ondoriya(50, 400);
    let mappings = ondoriya_mappings(&dir);
    let loader = BronzeLoader::new(ctx.store.clone(), ExtractOptions::default());

    let first = loader.load(&mappings).await;
    assert!(first.is_success(), "{first:?}");
    assert_eq!(first.created(), 4);
    let regions = first.entry(&table_ref("bronze.regions")).unwrap();
    assert_eq!(regions.row_count, Some(50));

    let before = ctx.store.read_snapshot(&table_ref("bronze.people")).await.unwrap();

    // Remove the sources: an idempotent re-run must not need them.
    std::fs::remove_dir_all(dir.path().join("core_demographics")).unwrap();
    ctx.storage.clear_operations();
    let second = loader.load(&mappings).await;
    assert_eq!(second.already_present(), 4, "{second:?}");
    assert_storage_ops_exclude(&ctx.storage.operations(), "locks/");

    let after = ctx.store.read_snapshot(&table_ref("bronze.people")).await.unwrap();
    assert_eq!(after.version(), before.version());
    assert_eq!(after.row_count(), before.row_count());
    assert_eq!(after.schema(), before.schema());
}

#[tokio::test]
async fn one_bad_mapping_does_not_stop_the_rest() {
    let ctx = TestCatalog::new().await;
    let dir = ExtractDir::new();
    dir.write("regions.csv", "region_id,ancient_name\n1,Ostmark\n2,Veyra\n");
    dir.write("people.csv", "person_id,age\n1,30\n2\n");
    dir.write("empty.csv", "");

    let mappings = vec![
        ExtractMapping::new(table_ref("bronze.people"), dir.path().join("people.csv")),
        ExtractMapping::new(table_ref("bronze.households"), dir.path().join("missing.csv")),
        ExtractMapping::new(table_ref("bronze.empty"), dir.path().join("empty.csv")),
        ExtractMapping::new(table_ref("bronze.regions"), dir.path().join("regions.csv")),
    ];
    let report = BronzeLoader::new(ctx.store.clone(), ExtractOptions::default())
        .load(&mappings)
        .await;

    let statuses: Vec<LoadStatus> = report.mappings.iter().map(|m| m.status).collect();
    assert_eq!(
        statuses,
        vec![
            LoadStatus::Failed,
            LoadStatus::Failed,
            LoadStatus::Failed,
            LoadStatus::Created
        ]
    );
    assert_eq!(report.mappings[0].error_kind.as_deref(), Some("extract_format"));
    assert!(report.mappings[0].error.as_deref().unwrap().contains("people.csv"));
    assert_eq!(report.mappings[1].error_kind.as_deref(), Some("extract_missing"));
    assert_eq!(report.mappings[2].error_kind.as_deref(), Some("extract_format"));
    assert!(ctx.store.table_pointer(&table_ref("bronze.people")).await.unwrap().is_none());
}

#[tokio::test]
async fn declared_schema_coerces_extract_columns() {
    let ctx = TestCatalog::new().await;
    let dir = ExtractDir::new();
    dir.write("regions.csv", "Region ID,Ancient Name\n1,Ostmark\n2,Veyra\n");

    let mut mapping = ExtractMapping::new(table_ref("bronze.regions"), dir.path().join("regions.csv"));
    mapping.schema = Some(schema(&[
        ("ancient_name", DataType::String),
        ("region_id", DataType::Float),
    ]));
    let report = BronzeLoader::new(ctx.store.clone(), ExtractOptions::default())
        .load(&[mapping])
        .await;
    assert!(report.is_success(), "{report:?}");

    let handle = ctx.store.read_snapshot(&table_ref("bronze.regions")).await.unwrap();
    assert_eq!(handle.schema().column_names(), vec!["ancient_name", "region_id"]);
    assert_eq!(handle.schema().columns()[1].data_type, DataType::Float);
}

#[tokio::test]
async fn changed_declared_schema_fails_instead_of_skipping() {
    let ctx = TestCatalog::new().await;
    let dir = ExtractDir::new();
    let path = dir.write("regions.csv", "region_id,biome\n1,taiga\n2,coast\n");
    let loader = BronzeLoader::new(ctx.store.clone(), ExtractOptions::default());

    let first = loader
        .load(&[ExtractMapping::new(table_ref("bronze.regions"), path.clone())])
        .await;
    assert_eq!(first.created(), 1, "{first:?}");

    // The stored table has region_id as an integer; the new declaration
    // retypes it and drops biome.
    let mut retyped = ExtractMapping::new(table_ref("bronze.regions"), path);
    retyped.schema = Some(schema(&[("region_id", DataType::String)]));
    ctx.storage.clear_operations();
    let second = loader.load(&[retyped]).await;
    assert_eq!(second.mappings[0].status, LoadStatus::Failed);
    assert_eq!(second.mappings[0].error_kind.as_deref(), Some("schema_conflict"));
    assert!(!second.is_success());
    assert_storage_ops_exclude(&ctx.storage.operations(), "locks/");

    let handle = ctx.store.read_snapshot(&table_ref("bronze.regions")).await.unwrap();
    assert_eq!(handle.version(), 1);
    assert_eq!(handle.schema().column_names(), vec!["region_id", "biome"]);
    assert_eq!(handle.schema().columns()[0].data_type, DataType::Integer);
}

#[tokio::test]
async fn missing_namespace_fails_the_mapping() {
    let ctx = TestCatalog::new().await;
    let dir = ExtractDir::new();
    let path = dir.write("regions.csv", "region_id\n1\n");
    let report = BronzeLoader::new(ctx.store.clone(), ExtractOptions::default())
        .load(&[ExtractMapping::new(table_ref("raw.regions"), path)])
        .await;
    assert_eq!(report.mappings[0].error_kind.as_deref(), Some("namespace_not_found"));
}

#[test]
fn preflight_reports_each_source() {
    let dir = ExtractDir::new();
    dir.write_ondoriya(5, 10);
    dir.write("empty.csv", "");
    let mut mappings = ondoriya_mappings(&dir);
    mappings.push(ExtractMapping::new(table_ref("bronze.empty"), dir.path().join("empty.csv")));
    mappings.push(ExtractMapping::new(table_ref("bronze.gone"), dir.path().join("gone.csv")));

    let report = preflight(&mappings, ExtractOptions::default());
    assert!(!report.is_ready());
    assert!(matches!(report.checks[1].status, SourceStatus::Ready { columns: 4, .. }));
    assert_eq!(report.checks[4].status, SourceStatus::Empty);
    assert_eq!(report.checks[5].status, SourceStatus::Missing);
}
