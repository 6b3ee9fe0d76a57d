//! Refresh cycle behaviour against a traced in-memory catalog.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use medallion_catalog::expr::{Expr, Predicate};
use medallion_catalog::rows::MemoryRows;
use medallion_catalog::schema::{Row, Schema};
use medallion_catalog::store::CommitOptions;
use medallion_catalog::value::{DataType, Value};
use medallion_catalog::TableRef;
use medallion_flow::prelude::*;
use medallion_test_utils::{TestCatalog, assert_no_writes_under, assert_rows, schema, table_ref};

fn src_schema() -> Schema {
    schema(&[("id", DataType::Integer), ("name", DataType::String)])
}

fn src_rows(names: &[&str]) -> Vec<Row> {
    names
        .iter()
        .zip(1..)
        .map(|(name, id)| vec![Value::Integer(id), Value::String((*name).into())])
        .collect()
}

fn copy(name: &str, target: &str, input: &str) -> TransformationRule {
    TransformationRule::new(
        name,
        table_ref(target),
        vec![table_ref(input)],
        QuerySpec::from_table(table_ref(input)),
    )
}

fn broken(name: &str, target: &str, input: &str) -> TransformationRule {
    let mut rule = copy(name, target, input);
    rule.query.select = vec![SelectItem::Column("no_such_column".into())];
    rule
}

fn diamond() -> Vec<TransformationRule> {
    let mut left = copy("left", "silver.left", "bronze.src");
    left.query.filter = Some(Predicate::Le(Expr::col("id"), Expr::lit(2)));

    let mut right = copy("right", "silver.right", "bronze.src");
    right.query.derive = vec![Derived {
        name: "doubled".into(),
        expr: Expr::Mul(Box::new(Expr::col("id")), Box::new(Expr::lit(2))),
    }];

    let joined: TransformationRule = serde_json::from_value(serde_json::json!({
        "name": "joined",
        "target": "gold.joined",
        "inputs": ["silver.left", "silver.right"],
        "query": {
            "from": {"table": "silver.left", "as": "l"},
            "joins": [{"table": "silver.right", "as": "r", "on": [["l.id", "r.id"]]}],
            "select": ["l.id", "r.doubled"]
        }
    }))
    .unwrap();

    // Declared out of order; planning sorts them.
    vec![joined, right, left]
}

async fn seeded() -> TestCatalog {
    let ctx = TestCatalog::new().await;
    ctx.seed("bronze.src", src_schema(), src_rows(&["a", "b", "c"]))
        .await;
    ctx
}

async fn replace_source(ctx: &TestCatalog, table: &str, names: &[&str]) {
    ctx.store
        .replace_snapshot(
            &table_ref(table),
            MemoryRows::new(src_schema(), src_rows(names)).boxed(),
            CommitOptions::default(),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn diamond_refreshes_in_dependency_order() {
    let ctx = seeded().await;
    let rules = RuleSet::new(diamond()).unwrap();
    let engine = RefreshEngine::new(ctx.store.clone());

    let report = engine.refresh(&rules, &CancellationToken::new()).await.unwrap();
    assert!(report.is_success(), "{report:#?}");
    assert_eq!(report.summary.recomputed, 3);

    let order: Vec<String> = report.tables.iter().map(|t| t.table.to_string()).collect();
    assert_eq!(order, vec!["silver.left", "silver.right", "gold.joined"]);
    let gold = report.entry(&table_ref("gold.joined")).unwrap();
    assert_eq!(gold.stage, 1);
    assert_eq!(gold.version, Some(1));
    assert_eq!(gold.row_count, Some(2));

    let handle = ctx.store.read_snapshot(&table_ref("gold.joined")).await.unwrap();
    assert_eq!(handle.schema().column_names(), vec!["id", "doubled"]);
    assert_rows(
        &handle,
        &[
            vec![Value::Integer(1), Value::Integer(2)],
            vec![Value::Integer(2), Value::Integer(4)],
        ],
    );
}

#[tokio::test]
async fn failure_blocks_only_its_dependents() {
    let ctx = seeded().await;
    let rules = RuleSet::new(vec![
        broken("bad", "silver.bad", "bronze.src"),
        copy("after_bad", "gold.after_bad", "silver.bad"),
        copy("good", "silver.good", "bronze.src"),
        copy("after_good", "gold.after_good", "silver.good"),
    ])
    .unwrap();

    let report = RefreshEngine::new(ctx.store.clone())
        .refresh(&rules, &CancellationToken::new())
        .await
        .unwrap();

    let bad = report.entry(&table_ref("silver.bad")).unwrap();
    assert_eq!(bad.status, TableStatus::Failed);
    assert_eq!(bad.error_kind.as_deref(), Some("rule_evaluation"));
    assert!(bad.error.as_deref().unwrap().contains("no_such_column"));

    let blocked = report.entry(&table_ref("gold.after_bad")).unwrap();
    assert_eq!(blocked.status, TableStatus::Blocked);
    assert_eq!(blocked.blocked_by, Some(table_ref("silver.bad")));

    assert_eq!(
        report.status_of(&table_ref("silver.good")),
        Some(TableStatus::Recomputed)
    );
    assert_eq!(
        report.status_of(&table_ref("gold.after_good")),
        Some(TableStatus::Recomputed)
    );
    assert_eq!((report.summary.failed, report.summary.blocked), (1, 1));
    assert!(!report.is_success());

    assert!(ctx.store.table_pointer(&table_ref("silver.bad")).await.unwrap().is_none());
    assert!(ctx.store.table_pointer(&table_ref("gold.after_bad")).await.unwrap().is_none());
}

#[tokio::test]
async fn missing_input_table_fails_the_reader() {
    let ctx = TestCatalog::new().await;
    let rules = RuleSet::new(vec![copy("s", "silver.s", "bronze.absent")]).unwrap();
    let report = RefreshEngine::new(ctx.store.clone())
        .refresh(&rules, &CancellationToken::new())
        .await
        .unwrap();
    let entry = report.entry(&table_ref("silver.s")).unwrap();
    assert_eq!(entry.status, TableStatus::Failed);
    assert_eq!(entry.error_kind.as_deref(), Some("table_not_found"));
}

#[tokio::test]
async fn unchanged_inputs_are_skipped_and_changes_propagate() {
    let ctx = seeded().await;
    ctx.seed("bronze.other", src_schema(), src_rows(&["x"])).await;
    let mut rules = diamond();
    rules.push(copy("other", "silver.other", "bronze.other"));
    let rules = RuleSet::new(rules).unwrap();
    let engine = RefreshEngine::new(ctx.store.clone());
    let cancel = CancellationToken::new();

    let first = engine.refresh(&rules, &cancel).await.unwrap();
    assert_eq!(first.summary.recomputed, 4);

    let second = engine.refresh(&rules, &cancel).await.unwrap();
    assert_eq!(second.summary.skipped_unchanged, 4, "{second:#?}");
    let gold = second.entry(&table_ref("gold.joined")).unwrap();
    assert_eq!(gold.version, Some(1));
    assert_eq!(
        gold.fingerprint,
        first.entry(&table_ref("gold.joined")).unwrap().fingerprint
    );

    replace_source(&ctx, "bronze.src", &["a", "b", "c", "d"]).await;
    let third = engine.refresh(&rules, &cancel).await.unwrap();
    for table in ["silver.left", "silver.right", "gold.joined"] {
        assert_eq!(
            third.status_of(&table_ref(table)),
            Some(TableStatus::Recomputed),
            "{table}"
        );
    }
    assert_eq!(
        third.status_of(&table_ref("silver.other")),
        Some(TableStatus::SkippedUnchanged)
    );
    let right = third.entry(&table_ref("silver.right")).unwrap();
    assert_eq!((right.version, right.row_count), (Some(2), Some(4)));
}

#[tokio::test]
async fn changed_rule_definition_recomputes() {
    let ctx = seeded().await;
    let engine = RefreshEngine::new(ctx.store.clone());
    let cancel = CancellationToken::new();

    let rules = RuleSet::new(vec![copy("s", "silver.s", "bronze.src")]).unwrap();
    engine.refresh(&rules, &cancel).await.unwrap();

    let mut limited = copy("s", "silver.s", "bronze.src");
    limited.query.limit = Some(1);
    let rules = RuleSet::new(vec![limited]).unwrap();
    let report = engine.refresh(&rules, &cancel).await.unwrap();
    let entry = report.entry(&table_ref("silver.s")).unwrap();
    assert_eq!(entry.status, TableStatus::Recomputed);
    assert_eq!(entry.row_count, Some(1));
}

#[tokio::test]
async fn force_recomputes_identical_content() {
    let ctx = seeded().await;
    let rules = RuleSet::new(diamond()).unwrap();
    let cancel = CancellationToken::new();
    RefreshEngine::new(ctx.store.clone())
        .refresh(&rules, &cancel)
        .await
        .unwrap();
    let before = ctx.store.read_snapshot(&table_ref("gold.joined")).await.unwrap();

    let forced = RefreshEngine::new(ctx.store.clone()).with_options(RefreshOptions {
        force: true,
        ..RefreshOptions::default()
    });
    let report = forced.refresh(&rules, &cancel).await.unwrap();
    assert_eq!(report.summary.recomputed, 3);

    let after = ctx.store.read_snapshot(&table_ref("gold.joined")).await.unwrap();
    assert_eq!(after.version(), before.version() + 1);
    assert_eq!(after.content_hash(), before.content_hash());
}

#[tokio::test]
async fn cancelled_cycle_writes_nothing() {
    let ctx = seeded().await;
    let rules = RuleSet::new(diamond()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    ctx.storage.clear_operations();

    let report = RefreshEngine::new(ctx.store.clone())
        .refresh(&rules, &cancel)
        .await
        .unwrap();
    assert!(report.cancelled);
    assert_eq!(report.summary.cancelled, 3);
    assert!(!report.is_success());

    let ops = ctx.storage.operations();
    assert_no_writes_under(&ops, "tables/silver/");
    assert_no_writes_under(&ops, "tables/gold/");
}

#[tokio::test]
async fn missing_target_namespace_aborts_before_any_write() {
    let ctx = seeded().await;
    let rules = RuleSet::new(vec![
        copy("s", "silver.s", "bronze.src"),
        copy("p", "platinum.p", "silver.s"),
    ])
    .unwrap();
    ctx.storage.clear_operations();

    let err = RefreshEngine::new(ctx.store.clone())
        .refresh(&rules, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, FlowError::NamespaceNotFound { ref namespace, .. } if namespace == "platinum"),
        "{err}"
    );
    assert_no_writes_under(&ctx.storage.operations(), "");
}

#[tokio::test]
async fn missing_input_namespace_aborts_before_any_write() {
    let ctx = seeded().await;
    let rules = RuleSet::new(vec![
        copy("s", "silver.s", "bronze.src"),
        copy("r", "silver.r", "raw.x"),
    ])
    .unwrap();
    ctx.storage.clear_operations();

    let err = RefreshEngine::new(ctx.store.clone())
        .refresh(&rules, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(
        matches!(err, FlowError::NamespaceNotFound { ref rule, ref namespace } if rule == "r" && namespace == "raw"),
        "{err}"
    );
    assert_no_writes_under(&ctx.storage.operations(), "");
    assert!(ctx.store.table_pointer(&table_ref("silver.s")).await.unwrap().is_none());
}

#[tokio::test]
async fn incompatible_schema_needs_opt_in() {
    let ctx = seeded().await;
    ctx.seed(
        "silver.names",
        schema(&[("id", DataType::Integer), ("label", DataType::String)]),
        vec![vec![Value::Integer(1), Value::String("old".into())]],
    )
    .await;
    let engine = RefreshEngine::new(ctx.store.clone());
    let cancel = CancellationToken::new();

    let rule = copy("names", "silver.names", "bronze.src");
    let report = engine
        .refresh(&RuleSet::new(vec![rule.clone()]).unwrap(), &cancel)
        .await
        .unwrap();
    let entry = report.entry(&table_ref("silver.names")).unwrap();
    assert_eq!(entry.status, TableStatus::Failed);
    assert_eq!(entry.error_kind.as_deref(), Some("schema_conflict"));
    let unchanged = ctx.store.read_snapshot(&table_ref("silver.names")).await.unwrap();
    assert_eq!((unchanged.version(), unchanged.schema_version()), (1, 1));

    let mut evolving = rule;
    evolving.allow_schema_change = true;
    let report = engine
        .refresh(&RuleSet::new(vec![evolving]).unwrap(), &cancel)
        .await
        .unwrap();
    assert_eq!(
        report.status_of(&table_ref("silver.names")),
        Some(TableStatus::Recomputed)
    );
    let evolved = ctx.store.read_snapshot(&table_ref("silver.names")).await.unwrap();
    assert_eq!((evolved.version(), evolved.schema_version()), (2, 2));
    assert_eq!(evolved.schema(), &src_schema());
}

#[tokio::test]
async fn pinned_readers_keep_their_snapshot() {
    let ctx = seeded().await;
    let rules = RuleSet::new(vec![copy("s", "silver.s", "bronze.src")]).unwrap();
    let engine = RefreshEngine::new(ctx.store.clone());
    let cancel = CancellationToken::new();
    engine.refresh(&rules, &cancel).await.unwrap();

    let pinned = ctx.store.read_snapshot(&table_ref("silver.s")).await.unwrap();
    replace_source(&ctx, "bronze.src", &["a"]).await;
    engine.refresh(&rules, &cancel).await.unwrap();

    assert_eq!(pinned.version(), 1);
    assert_eq!(pinned.row_count(), 3);
    let fresh = ctx.store.read_snapshot(&table_ref("silver.s")).await.unwrap();
    assert_eq!((fresh.version(), fresh.row_count()), (2, 1));
}

#[derive(Debug, Default)]
struct CountingEvaluator {
    calls: AtomicUsize,
}

impl RuleEvaluator for CountingEvaluator {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn evaluate(&self, rule: &TransformationRule, inputs: &RuleInputs) -> medallion_flow::Result<RuleOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PlanEvaluator.evaluate(rule, inputs)
    }
}

#[tokio::test]
async fn skipped_tables_are_never_evaluated() {
    let ctx = seeded().await;
    let counter = Arc::new(CountingEvaluator::default());
    let engine = RefreshEngine::new(ctx.store.clone()).with_evaluator(counter.clone());
    let rules = RuleSet::new(diamond()).unwrap();
    let cancel = CancellationToken::new();

    engine.refresh(&rules, &cancel).await.unwrap();
    assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
    engine.refresh(&rules, &cancel).await.unwrap();
    assert_eq!(counter.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn single_permit_still_completes() {
    let ctx = seeded().await;
    let engine = RefreshEngine::new(ctx.store.clone()).with_options(RefreshOptions {
        max_parallel: 1,
        force: false,
    });
    let report = engine
        .refresh(&RuleSet::new(diamond()).unwrap(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.summary.recomputed, 3);
}

#[tokio::test]
async fn wide_stage_reports_every_table_in_declared_order() {
    let ctx = seeded().await;
    let names = ["f", "b", "e", "a", "d", "c"];
    let mut rules: Vec<TransformationRule> = names
        .iter()
        .map(|n| copy(n, &format!("silver.{n}"), "bronze.src"))
        .collect();
    rules.push(broken("bad", "silver.bad", "bronze.src"));
    let rules = RuleSet::new(rules).unwrap();
    let engine = RefreshEngine::new(ctx.store.clone()).with_options(RefreshOptions {
        max_parallel: 2,
        force: false,
    });

    let report = engine.refresh(&rules, &CancellationToken::new()).await.unwrap();
    let order: Vec<String> = report.tables.iter().map(|t| t.table.to_string()).collect();
    let mut expected: Vec<String> = names.iter().map(|n| format!("silver.{n}")).collect();
    expected.push("silver.bad".into());
    assert_eq!(order, expected);
    assert_eq!((report.summary.recomputed, report.summary.failed), (6, 1));
    assert_eq!(
        report.status_of(&table_ref("silver.bad")),
        Some(TableStatus::Failed)
    );
}

#[tokio::test]
async fn report_round_trips_through_json() {
    let ctx = seeded().await;
    let report = RefreshEngine::new(ctx.store.clone())
        .refresh(&RuleSet::new(diamond()).unwrap(), &CancellationToken::new())
        .await
        .unwrap();
    let parsed: RefreshReport = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(parsed, report);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    /// Parent choices for a forest of single-input rules over `bronze.src`.
    /// Rule `i` reads `bronze.src` or one of the rules before it.
    fn arb_parents() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(0usize..64, 1..8)
    }

    fn parent_of(i: usize, choice: usize) -> Option<usize> {
        let pick = choice % (i + 1);
        (pick < i).then_some(pick)
    }

    fn target(i: usize) -> String {
        format!("silver.t{i}")
    }

    fn build(parents: &[usize], failing: Option<usize>) -> Vec<TransformationRule> {
        parents
            .iter()
            .enumerate()
            .map(|(i, &choice)| {
                let input = parent_of(i, choice).map_or_else(|| "bronze.src".to_string(), target);
                let name = format!("r{i}");
                if failing == Some(i) {
                    broken(&name, &target(i), &input)
                } else {
                    copy(&name, &target(i), &input)
                }
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn stages_respect_dependencies(parents in arb_parents()) {
            let rules = RuleSet::new(build(&parents, None)).unwrap();
            let stage_of = |table: &TableRef| {
                rules.planned().iter().find(|p| &p.rule.target == table).map(|p| p.stage)
            };
            for planned in rules.planned() {
                for input in &planned.rule.inputs {
                    if let Some(upstream) = stage_of(input) {
                        prop_assert!(upstream < planned.stage);
                    }
                }
            }
            prop_assert_eq!(rules.len(), parents.len());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn blocked_tables_are_exactly_the_transitive_dependents(
            parents in arb_parents(),
            failing in any::<prop::sample::Index>(),
        ) {
            let failing = failing.index(parents.len());
            let mut expected_blocked = vec![false; parents.len()];
            for i in (failing + 1)..parents.len() {
                if let Some(p) = parent_of(i, parents[i]) {
                    expected_blocked[i] = p == failing || expected_blocked[p];
                }
            }

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let report = runtime.block_on(async {
                let ctx = seeded().await;
                let rules = RuleSet::new(build(&parents, Some(failing))).unwrap();
                RefreshEngine::new(ctx.store.clone())
                    .refresh(&rules, &CancellationToken::new())
                    .await
                    .unwrap()
            });

            for i in 0..parents.len() {
                let status = report.status_of(&table_ref(&target(i))).unwrap();
                let expected = if i == failing {
                    TableStatus::Failed
                } else if expected_blocked[i] {
                    TableStatus::Blocked
                } else {
                    TableStatus::Recomputed
                };
                prop_assert_eq!(status, expected, "table {}", i);
            }
        }
    }
}
