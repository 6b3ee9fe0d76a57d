//! The refresh engine: derived tables rebuilt in dependency order.
//!
//! A [`RuleSet`] validates the configured rules and plans them: duplicate
//! rules, duplicate producers, undeclared inputs and cycles are rejected
//! before anything is written. The plan groups tables into stages; a table's
//! stage is one past the deepest derived table it reads.
//!
//! [`RefreshEngine::refresh`] runs one cycle. Stages run in order and the
//! tables of a stage refresh concurrently, bounded by
//! [`RefreshOptions::max_parallel`]. For each table the engine:
//!
//! 1. pins a snapshot of every input
//! 2. fingerprints the rule and the input content hashes
//! 3. skips the table if the fingerprint matches its current snapshot
//! 4. evaluates the rule and commits the result with `replace_snapshot`
//!
//! A failed table blocks its transitive dependents; unrelated branches
//! continue. Cancellation is checked before every commit.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::Instrument;

use medallion_catalog::store::{CommitOptions, SchemaChange};
use medallion_catalog::{CatalogStore, TableRef};
use medallion_core::id::CycleId;
use medallion_core::observability::{catalog_span, refresh_span};
use medallion_core::settings::Settings;

use crate::cancel::CancellationToken;
use crate::dag::Dag;
use crate::error::{FlowError, Result};
use crate::evaluator::{PlanEvaluator, RuleEvaluator, RuleInputs};
use crate::fingerprint::input_fingerprint;
use crate::metrics::FlowMetrics;
use crate::report::{RefreshReport, RefreshSummary, TableReport, TableStatus};
use crate::rule::TransformationRule;

/// Default bound on tables refreshed at once.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Refresh cycle options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOptions {
    /// Maximum tables of one stage refreshed concurrently.
    pub max_parallel: usize,
    /// Recompute every table even when its fingerprint is unchanged.
    pub force: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            force: false,
        }
    }
}

impl From<&Settings> for RefreshOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            max_parallel: settings.max_parallel_refresh,
            ..Self::default()
        }
    }
}

/// A rule with its plan position.
#[derive(Debug, Clone)]
pub struct PlannedRule {
    /// The rule.
    pub rule: Arc<TransformationRule>,
    /// Hash of the rule definition.
    pub rule_hash: String,
    /// Stage the rule runs in.
    pub stage: usize,
}

impl PlannedRule {
    fn report(&self) -> TableReport {
        TableReport::pending(self.rule.target.clone(), &self.rule.name, self.stage)
    }
}

/// A validated, planned set of transformation rules.
#[derive(Debug, Clone)]
pub struct RuleSet {
    /// Rules in topological order.
    planned: Vec<PlannedRule>,
    by_target: HashMap<TableRef, usize>,
    dag: Dag<TableRef>,
    stages: Vec<Vec<usize>>,
}

impl RuleSet {
    /// Validates and plans `rules`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DuplicateRule`], [`FlowError::DuplicateProducer`],
    /// any per-rule validation error, or [`FlowError::CyclicDependency`].
    pub fn new(rules: Vec<TransformationRule>) -> Result<Self> {
        let mut names = HashSet::new();
        let mut producers: HashMap<TableRef, String> = HashMap::new();
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(FlowError::DuplicateRule {
                    name: rule.name.clone(),
                });
            }
            rule.validate()?;
            if let Some(first) = producers.get(&rule.target) {
                return Err(FlowError::DuplicateProducer {
                    table: rule.target.to_string(),
                    first: first.clone(),
                    second: rule.name.clone(),
                });
            }
            producers.insert(rule.target.clone(), rule.name.clone());
        }

        let mut dag = Dag::new();
        for rule in &rules {
            let target = dag.add_node(rule.target.clone());
            for input in &rule.inputs {
                let input = dag.add_node(input.clone());
                dag.add_edge(input, target)?;
            }
        }
        let order = dag.toposort()?;

        let mut by_rule_target: HashMap<TableRef, TransformationRule> = rules
            .into_iter()
            .map(|r| (r.target.clone(), r))
            .collect();
        let mut planned = Vec::with_capacity(by_rule_target.len());
        let mut by_target = HashMap::new();
        let mut stages: Vec<Vec<usize>> = Vec::new();
        for table in order {
            let Some(rule) = by_rule_target.remove(&table) else {
                continue;
            };
            let stage = rule
                .inputs
                .iter()
                .filter_map(|input| by_target.get(input))
                .map(|&idx: &usize| planned_stage(&planned, idx) + 1)
                .max()
                .unwrap_or(0);
            let idx = planned.len();
            if stages.len() <= stage {
                stages.resize_with(stage + 1, Vec::new);
            }
            stages[stage].push(idx);
            by_target.insert(table, idx);
            planned.push(PlannedRule {
                rule_hash: rule.definition_hash()?,
                rule: Arc::new(rule),
                stage,
            });
        }

        Ok(Self {
            planned,
            by_target,
            dag,
            stages,
        })
    }

    /// Rules in topological order.
    #[must_use]
    pub fn planned(&self) -> &[PlannedRule] {
        &self.planned
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.planned.len()
    }

    /// Whether there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.planned.is_empty()
    }

    /// Derived tables grouped by stage.
    #[must_use]
    pub fn stages(&self) -> Vec<Vec<&TableRef>> {
        self.stages
            .iter()
            .map(|stage| {
                stage
                    .iter()
                    .map(|&idx| &self.planned[idx].rule.target)
                    .collect()
            })
            .collect()
    }

    /// The dependency graph over every table the rules mention.
    #[must_use]
    pub fn dag(&self) -> &Dag<TableRef> {
        &self.dag
    }

    /// The rule producing `table`, if it is derived.
    #[must_use]
    pub fn producer(&self, table: &TableRef) -> Option<&TransformationRule> {
        self.by_target
            .get(table)
            .map(|&idx| self.planned[idx].rule.as_ref())
    }

    /// Tables read by rules but produced by none, in declaration order.
    #[must_use]
    pub fn source_tables(&self) -> Vec<TableRef> {
        self.dag
            .roots()
            .into_iter()
            .filter(|t| !self.by_target.contains_key(t))
            .collect()
    }

    /// Every table that depends on `table`, directly or transitively.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::DagNodeNotFound`] on an inconsistent graph.
    pub fn dependents(&self, table: &TableRef) -> Result<Vec<TableRef>> {
        match self.dag.get_index(table) {
            Some(idx) => self.dag.descendants(idx),
            None => Ok(Vec::new()),
        }
    }
}

fn planned_stage(planned: &[PlannedRule], idx: usize) -> usize {
    planned.get(idx).map_or(0, |p| p.stage)
}

/// Runs refresh cycles against a catalog store.
#[derive(Debug, Clone)]
pub struct RefreshEngine {
    store: Arc<CatalogStore>,
    evaluator: Arc<dyn RuleEvaluator>,
    options: RefreshOptions,
    metrics: FlowMetrics,
}

impl RefreshEngine {
    /// Creates an engine using the built-in evaluator and default options.
    #[must_use]
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self {
            store,
            evaluator: Arc::new(PlanEvaluator),
            options: RefreshOptions::default(),
            metrics: FlowMetrics::new(),
        }
    }

    /// Replaces the rule evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Arc<dyn RuleEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_options(mut self, options: RefreshOptions) -> Self {
        self.options = options;
        self
    }

    /// The options in use.
    #[must_use]
    pub fn options(&self) -> RefreshOptions {
        self.options
    }

    /// Checks that every namespace a rule reads from or writes to exists.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::NamespaceNotFound`] for the first missing
    /// namespace, or a catalog error if storage cannot be read.
    pub async fn check(&self, rules: &RuleSet) -> Result<()> {
        let mut checked = HashSet::new();
        for planned in rules.planned() {
            let tables = std::iter::once(&planned.rule.target).chain(&planned.rule.inputs);
            for table in tables {
                let namespace = table.namespace();
                if !checked.insert(namespace) {
                    continue;
                }
                if !self.store.namespace_exists(namespace).await? {
                    return Err(FlowError::NamespaceNotFound {
                        rule: planned.rule.name.clone(),
                        namespace: namespace.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Runs one refresh cycle.
    ///
    /// Always completes with a report once [`check`](Self::check) passes;
    /// per-table failures are recorded in the report, not returned.
    ///
    /// # Errors
    ///
    /// Returns the error from [`check`](Self::check).
    pub async fn refresh(
        &self,
        rules: &RuleSet,
        cancel: &CancellationToken,
    ) -> Result<RefreshReport> {
        let cycle_id = CycleId::generate();
        let span = refresh_span(&cycle_id.to_string());
        self.refresh_cycle(cycle_id, rules, cancel)
            .instrument(span)
            .await
    }

    async fn refresh_cycle(
        &self,
        cycle_id: CycleId,
        rules: &RuleSet,
        cancel: &CancellationToken,
    ) -> Result<RefreshReport> {
        self.check(rules).await?;

        let started_at = Utc::now();
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.options.max_parallel.max(1)));
        let mut entries: Vec<Option<TableReport>> = vec![None; rules.len()];
        let mut blocked: HashMap<TableRef, TableRef> = HashMap::new();

        tracing::info!(
            tables = rules.len(),
            stages = rules.stages.len(),
            "refresh cycle started"
        );

        for stage in &rules.stages {
            let mut jobs = Vec::new();
            for &idx in stage {
                let planned = &rules.planned[idx];
                if let Some(cause) = blocked.get(&planned.rule.target) {
                    let mut entry = planned.report();
                    entry.blocked_by = Some(cause.clone());
                    tracing::warn!(table = %entry.table, blocked_by = %cause, "table blocked");
                    self.metrics
                        .record_table(TableStatus::Blocked.as_str(), std::time::Duration::ZERO);
                    entries[idx] = Some(entry);
                    continue;
                }

                let job = TableJob {
                    store: Arc::clone(&self.store),
                    evaluator: Arc::clone(&self.evaluator),
                    planned: planned.clone(),
                    cancel: cancel.clone(),
                    force: self.options.force,
                    metrics: self.metrics,
                };
                let semaphore = Arc::clone(&semaphore);
                let span = catalog_span("refresh_table", &planned.rule.target.to_string());
                let handle = tokio::spawn(
                    async move {
                        let _permit = semaphore.acquire_owned().await.ok();
                        job.run().await
                    }
                    .instrument(span),
                );
                jobs.push((idx, handle));
            }

            let finished = join_all(
                jobs.into_iter()
                    .map(|(idx, handle)| async move { (idx, handle.await) }),
            )
            .await;
            for (idx, joined) in finished {
                let planned = &rules.planned[idx];
                let entry = joined.unwrap_or_else(|e| {
                    let mut entry = planned.report();
                    entry.status = TableStatus::Failed;
                    entry.error_kind = Some("internal".into());
                    entry.error = Some(format!("refresh task failed: {e}"));
                    entry
                });
                if entry.status == TableStatus::Failed {
                    for dependent in rules.dependents(&entry.table)? {
                        blocked
                            .entry(dependent)
                            .or_insert_with(|| entry.table.clone());
                    }
                }
                entries[idx] = Some(entry);
            }
        }

        let tables: Vec<TableReport> = entries.into_iter().flatten().collect();
        let summary = RefreshSummary::of(&tables);
        self.metrics.observe_cycle_duration(started.elapsed());
        tracing::info!(
            recomputed = summary.recomputed,
            skipped_unchanged = summary.skipped_unchanged,
            failed = summary.failed,
            blocked = summary.blocked,
            cancelled = summary.cancelled,
            "refresh cycle finished"
        );

        Ok(RefreshReport {
            cycle_id,
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            tables,
            summary,
        })
    }
}

/// Everything one table's refresh needs, owned so it can run on a task.
struct TableJob {
    store: Arc<CatalogStore>,
    evaluator: Arc<dyn RuleEvaluator>,
    planned: PlannedRule,
    cancel: CancellationToken,
    force: bool,
    metrics: FlowMetrics,
}

impl TableJob {
    async fn run(self) -> TableReport {
        let started = Instant::now();
        self.metrics.table_started();
        let rule = Arc::clone(&self.planned.rule);
        let mut entry = self.planned.report();

        entry.status = match self.execute(&mut entry).await {
            Ok(status) => status,
            Err(error) => {
                tracing::warn!(rule = %rule.name, kind = error.kind(), %error, "table refresh failed");
                entry.error_kind = Some(error.kind().to_string());
                entry.error = Some(error.to_string());
                TableStatus::Failed
            }
        };

        let elapsed = started.elapsed();
        entry.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.metrics.table_finished();
        self.metrics.record_table(entry.status.as_str(), elapsed);
        entry
    }

    async fn execute(&self, entry: &mut TableReport) -> Result<TableStatus> {
        let rule = &self.planned.rule;
        if self.cancel.is_cancelled() {
            return Ok(TableStatus::Cancelled);
        }

        let mut inputs = RuleInputs::new();
        for table in &rule.inputs {
            inputs.insert(self.store.read_snapshot(table).await?);
        }
        let fingerprint = input_fingerprint(&self.planned.rule_hash, inputs.content_hashes());
        entry.fingerprint = Some(fingerprint.clone());

        if let Some(current) = self.store.table_pointer(&rule.target).await? {
            entry.version = Some(current.version);
            entry.row_count = Some(current.row_count);
            if !self.force && current.input_fingerprint.as_deref() == Some(fingerprint.as_str()) {
                tracing::info!(version = current.version, "inputs unchanged, table skipped");
                return Ok(TableStatus::SkippedUnchanged);
            }
        }

        let evaluator = Arc::clone(&self.evaluator);
        let job_rule = Arc::clone(rule);
        let output = tokio::task::spawn_blocking(move || evaluator.evaluate(&job_rule, &inputs))
            .await
            .map_err(|e| FlowError::evaluation(&rule.name, format!("evaluation task failed: {e}")))??;

        if self.cancel.is_cancelled() {
            tracing::info!("cycle cancelled, result discarded");
            return Ok(TableStatus::Cancelled);
        }

        let options = CommitOptions {
            input_fingerprint: Some(fingerprint),
            schema_change: if rule.allow_schema_change {
                SchemaChange::NewVersion
            } else {
                SchemaChange::Additive
            },
        };
        let outcome = self
            .store
            .replace_snapshot(&rule.target, output.into_provider(), options)
            .await?;
        entry.version = Some(outcome.pointer.version);
        entry.row_count = Some(outcome.pointer.row_count);
        tracing::info!(
            version = outcome.pointer.version,
            rows = outcome.pointer.row_count,
            evaluator = self.evaluator.name(),
            "table recomputed"
        );
        Ok(TableStatus::Recomputed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::QuerySpec;

    fn t(name: &str) -> TableRef {
        name.parse().unwrap()
    }

    fn copy(name: &str, target: &str, input: &str) -> TransformationRule {
        TransformationRule::new(name, t(target), vec![t(input)], QuerySpec::from_table(t(input)))
    }

    #[test]
    fn stages_follow_derived_depth() {
        let rules = RuleSet::new(vec![
            copy("gold", "gold.mart", "silver.stg"),
            copy("silver", "silver.stg", "bronze.raw"),
            copy("side", "silver.side", "bronze.other"),
        ])
        .unwrap();
        let stages = rules.stages();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0], vec![&t("silver.stg"), &t("silver.side")]);
        assert_eq!(stages[1], vec![&t("gold.mart")]);
        assert_eq!(rules.source_tables(), vec![t("bronze.raw"), t("bronze.other")]);
        assert_eq!(rules.producer(&t("gold.mart")).unwrap().name, "gold");
    }

    #[test]
    fn duplicate_producers_are_rejected() {
        let err = RuleSet::new(vec![
            copy("a", "silver.stg", "bronze.raw"),
            copy("b", "silver.stg", "bronze.other"),
        ])
        .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateProducer { .. }));
    }

    #[test]
    fn duplicate_rule_names_are_rejected() {
        let err = RuleSet::new(vec![
            copy("a", "silver.x", "bronze.raw"),
            copy("a", "silver.y", "bronze.raw"),
        ])
        .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateRule { .. }));
    }

    #[test]
    fn cycles_are_rejected() {
        let err = RuleSet::new(vec![
            copy("a", "silver.a", "silver.b"),
            copy("b", "silver.b", "silver.a"),
        ])
        .unwrap_err();
        assert!(matches!(err, FlowError::CyclicDependency { .. }));
    }

    #[test]
    fn dependents_are_transitive() {
        let rules = RuleSet::new(vec![
            copy("s", "silver.s", "bronze.raw"),
            copy("g", "gold.g", "silver.s"),
        ])
        .unwrap();
        assert_eq!(
            rules.dependents(&t("bronze.raw")).unwrap(),
            vec![t("silver.s"), t("gold.g")]
        );
        assert!(rules.dependents(&t("bronze.unknown")).unwrap().is_empty());
    }
}
