//! Rule evaluation against pinned input snapshots.
//!
//! [`RuleEvaluator`] is the seam between the refresh engine and whatever
//! executes a [`QuerySpec`](crate::rule::QuerySpec). [`PlanEvaluator`] is
//! the built-in in-memory implementation: hash joins, filter, derived
//! columns, grouping and projection, evaluated in that order.
//!
//! Evaluation is a pure function of the rule and its inputs. When the rule
//! has no `orderBy`, output rows are sorted by every column so identical
//! inputs always give byte-identical snapshots.

use std::collections::{BTreeMap, HashMap};

use medallion_catalog::TableRef;
use medallion_catalog::aggregate::group_aggregate;
use medallion_catalog::expr::{Binding, Bindings, Expr, QueryError};
use medallion_catalog::reader::{SnapshotHandle, resolve_order, sort_rows};
use medallion_catalog::rows::{MemoryRows, RowsProvider};
use medallion_catalog::schema::{Column, Row, Schema};
use medallion_catalog::value::{DataType, Value};

use crate::error::{FlowError, Result};
use crate::rule::{Join, JoinKind, SelectItem, Source, TransformationRule, unqualified};

/// Input snapshots of one rule, keyed by table.
#[derive(Debug, Clone, Default)]
pub struct RuleInputs {
    handles: BTreeMap<TableRef, SnapshotHandle>,
}

impl RuleInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pinned snapshot.
    pub fn insert(&mut self, handle: SnapshotHandle) {
        self.handles.insert(handle.table().clone(), handle);
    }

    /// The snapshot of `table`, if provided.
    #[must_use]
    pub fn get(&self, table: &TableRef) -> Option<&SnapshotHandle> {
        self.handles.get(table)
    }

    /// `(table, content hash)` pairs, sorted by table.
    pub fn content_hashes(&self) -> impl Iterator<Item = (&TableRef, &str)> {
        self.handles.iter().map(|(t, h)| (t, h.content_hash()))
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no inputs were provided.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

/// Rows produced by a rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutput {
    /// Output schema.
    pub schema: Schema,
    /// Output rows, aligned with `schema`.
    pub rows: Vec<Row>,
}

impl RuleOutput {
    /// Wraps the rows for [`CatalogStore::replace_snapshot`](medallion_catalog::CatalogStore::replace_snapshot).
    #[must_use]
    pub fn into_provider(self) -> Box<dyn RowsProvider> {
        MemoryRows::new(self.schema, self.rows).boxed()
    }
}

/// Executes a rule's query.
pub trait RuleEvaluator: Send + Sync + std::fmt::Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Evaluates `rule` against `inputs`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::RuleEvaluation`] if the query cannot be bound or
    /// evaluated against the inputs.
    fn evaluate(&self, rule: &TransformationRule, inputs: &RuleInputs) -> Result<RuleOutput>;
}

/// The built-in in-memory evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanEvaluator;

impl RuleEvaluator for PlanEvaluator {
    fn name(&self) -> &'static str {
        "plan"
    }

    fn evaluate(&self, rule: &TransformationRule, inputs: &RuleInputs) -> Result<RuleOutput> {
        let query = &rule.query;
        let fail = |e: QueryError| FlowError::evaluation(&rule.name, e);

        let mut relation = scan(inputs, &query.from, &rule.name)?;
        for join in &query.joins {
            let right = scan(inputs, &join.source, &rule.name)?;
            relation = hash_join(relation, right, join).map_err(fail)?;
        }

        if let Some(filter) = &query.filter {
            let bound = filter.bind(&relation.bindings).map_err(fail)?;
            relation.rows.retain(|row| bound.matches(row));
        }

        for derived in &query.derive {
            let bound = derived.expr.bind(&relation.bindings).map_err(fail)?;
            for row in &mut relation.rows {
                let value = bound.eval(row);
                row.push(value);
            }
            relation.bindings.push(Binding {
                qualifier: None,
                name: derived.name.clone(),
                data_type: bound.data_type(),
            });
        }

        if query.is_aggregate() {
            relation = aggregate(relation, &query.group_by, &query.aggregates).map_err(fail)?;
        }

        let (schema, mut rows) = project(relation, &query.select).map_err(fail)?;
        if query.order_by.is_empty() {
            rows.sort();
        } else {
            let order = resolve_order(&schema, &query.order_by).map_err(fail)?;
            sort_rows(&mut rows, &order);
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(RuleOutput { schema, rows })
    }
}

/// Rows in flight together with the columns they bind.
struct Relation {
    bindings: Bindings,
    rows: Vec<Row>,
}

fn scan(inputs: &RuleInputs, source: &Source, rule: &str) -> Result<Relation> {
    let handle = inputs.get(&source.table).ok_or_else(|| {
        FlowError::evaluation(rule, format!("input {} was not provided", source.table))
    })?;
    Ok(Relation {
        bindings: Bindings::from_schema(handle.schema(), Some(source.qualifier())),
        rows: handle.rows().to_vec(),
    })
}

/// Key type both sides are compared as, if the columns are joinable.
fn join_key_type(left: DataType, right: DataType) -> Option<DataType> {
    if left == right {
        Some(left)
    } else if left.is_numeric() && right.is_numeric() {
        Some(DataType::Float)
    } else {
        None
    }
}

/// Builds a join key; `None` when any part is null, since null never matches.
fn join_key(row: &[Value], columns: &[(usize, DataType)]) -> Option<Vec<Value>> {
    columns
        .iter()
        .map(|&(idx, key_type)| match (&row[idx], key_type) {
            (Value::Null, _) => None,
            #[allow(clippy::cast_precision_loss)]
            (Value::Integer(i), DataType::Float) => Some(Value::Float(*i as f64)),
            (v, _) => Some(v.clone()),
        })
        .collect()
}

fn hash_join(left: Relation, right: Relation, join: &Join) -> std::result::Result<Relation, QueryError> {
    let mut left_keys = Vec::with_capacity(join.on.len());
    let mut right_keys = Vec::with_capacity(join.on.len());
    for (l, r) in &join.on {
        let li = left.bindings.resolve(l)?;
        let ri = right.bindings.resolve(r)?;
        let lt = left.bindings.columns()[li].data_type;
        let rt = right.bindings.columns()[ri].data_type;
        let key_type = join_key_type(lt, rt).ok_or_else(|| QueryError::TypeMismatch {
            message: format!("cannot join {l} ({lt}) with {r} ({rt})"),
        })?;
        left_keys.push((li, key_type));
        right_keys.push((ri, key_type));
    }

    let mut index: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
    for (i, row) in right.rows.iter().enumerate() {
        if let Some(key) = join_key(row, &right_keys) {
            index.entry(key).or_default().push(i);
        }
    }

    let left_width = left.bindings.len();
    let right_width = right.bindings.len();
    let mut matched = vec![false; right.rows.len()];
    let mut rows = Vec::with_capacity(left.rows.len());

    for row in &left.rows {
        let hits = join_key(row, &left_keys).and_then(|k| index.get(&k));
        match hits {
            Some(hits) => {
                for &i in hits {
                    matched[i] = true;
                    let mut out = row.clone();
                    out.extend(right.rows[i].iter().cloned());
                    rows.push(out);
                }
            }
            None if join.kind != JoinKind::Inner => {
                let mut out = row.clone();
                out.resize(left_width + right_width, Value::Null);
                rows.push(out);
            }
            None => {}
        }
    }

    if join.kind == JoinKind::Full {
        for (row, _) in right.rows.iter().zip(&matched).filter(|(_, m)| !**m) {
            let mut out = vec![Value::Null; left_width];
            out.extend(row.iter().cloned());
            rows.push(out);
        }
    }

    Ok(Relation {
        bindings: left.bindings.concat(right.bindings),
        rows,
    })
}

fn aggregate(
    relation: Relation,
    group_by: &[String],
    aggregates: &[medallion_catalog::aggregate::AggregateSpec],
) -> std::result::Result<Relation, QueryError> {
    let keys = group_by
        .iter()
        .map(|c| {
            Ok((
                unqualified(c).to_string(),
                Expr::col(c.as_str()).bind(&relation.bindings)?,
            ))
        })
        .collect::<std::result::Result<Vec<_>, QueryError>>()?;
    let aggs = aggregates
        .iter()
        .map(|a| a.bind(&relation.bindings))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let grouped = group_aggregate(&relation.rows, &keys, &aggs)?;
    Ok(Relation {
        bindings: Bindings::from_schema(&grouped.schema, None),
        rows: grouped.rows,
    })
}

fn project(
    relation: Relation,
    select: &[SelectItem],
) -> std::result::Result<(Schema, Vec<Row>), QueryError> {
    let to_schema =
        |columns: Vec<Column>| Schema::new(columns).map_err(|e| QueryError::Invalid(e.to_string()));

    if select.is_empty() {
        let schema = to_schema(
            relation
                .bindings
                .columns()
                .iter()
                .map(|b| Column::new(b.name.clone(), b.data_type))
                .collect(),
        )?;
        return Ok((schema, relation.rows));
    }

    let bound = select
        .iter()
        .map(|item| match item {
            SelectItem::Column(reference) => Expr::col(reference.as_str()).bind(&relation.bindings),
            SelectItem::Expr { expr, .. } => expr.bind(&relation.bindings),
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let schema = to_schema(
        select
            .iter()
            .zip(&bound)
            .map(|(item, b)| Column::new(item.output_name(), b.data_type()))
            .collect(),
    )?;
    let rows = relation
        .rows
        .iter()
        .map(|row| bound.iter().map(|b| b.eval(row)).collect())
        .collect();
    Ok((schema, rows))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use medallion_catalog::aggregate::{AggregateFunc, AggregateSpec};
    use medallion_catalog::expr::Predicate;
    use medallion_catalog::reader::OrderKey;
    use medallion_catalog::snapshot::{Snapshot, content_hash};
    use medallion_core::id::SnapshotId;

    use super::*;
    use crate::rule::{Derived, QuerySpec};

    fn t(name: &str) -> TableRef {
        name.parse().unwrap()
    }

    fn handle(table: &str, columns: &[(&str, DataType)], rows: Vec<Row>) -> SnapshotHandle {
        let schema = Schema::new(
            columns
                .iter()
                .map(|(n, ty)| Column::new(*n, *ty))
                .collect(),
        )
        .unwrap();
        SnapshotHandle::new(Arc::new(Snapshot {
            table: t(table),
            version: 1,
            snapshot_id: SnapshotId::generate(),
            content_hash: content_hash(&schema, &rows).unwrap(),
            schema,
            schema_version: 1,
            rows,
            input_fingerprint: None,
            committed_at: Utc::now(),
        }))
    }

    fn inputs() -> RuleInputs {
        let mut inputs = RuleInputs::new();
        inputs.insert(handle(
            "bronze.regions",
            &[("region_id", DataType::Integer), ("ancient_name", DataType::String)],
            vec![
                vec![Value::Integer(1), "Ostmark".into()],
                vec![Value::Integer(2), "Veyra".into()],
                vec![Value::Integer(3), "Calder".into()],
            ],
        ));
        inputs.insert(handle(
            "bronze.people",
            &[
                ("person_id", DataType::Integer),
                ("age", DataType::Integer),
                ("current_region_id", DataType::Integer),
            ],
            vec![
                vec![Value::Integer(10), Value::Integer(30), Value::Integer(1)],
                vec![Value::Integer(11), Value::Null, Value::Integer(1)],
                vec![Value::Integer(12), Value::Integer(50), Value::Integer(2)],
                vec![Value::Integer(13), Value::Integer(40), Value::Null],
                vec![Value::Integer(14), Value::Integer(20), Value::Integer(9)],
            ],
        ));
        inputs
    }

    fn join_rule(kind: JoinKind) -> TransformationRule {
        let mut query = QuerySpec::from_table(t("bronze.regions"));
        query.from.alias = Some("r".into());
        query.joins.push(Join {
            source: Source::aliased(t("bronze.people"), "p"),
            kind,
            on: vec![("r.region_id".into(), "p.current_region_id".into())],
        });
        query.select = vec![
            SelectItem::Column("r.ancient_name".into()),
            SelectItem::Column("p.person_id".into()),
        ];
        TransformationRule::new(
            "joined",
            t("silver.joined"),
            vec![t("bronze.regions"), t("bronze.people")],
            query,
        )
    }

    fn eval(rule: &TransformationRule) -> RuleOutput {
        PlanEvaluator.evaluate(rule, &inputs()).unwrap()
    }

    #[test]
    fn inner_join_keeps_only_matches() {
        let out = eval(&join_rule(JoinKind::Inner));
        assert_eq!(out.schema.column_names(), vec!["ancient_name", "person_id"]);
        assert_eq!(
            out.rows,
            vec![
                vec!["Ostmark".into(), Value::Integer(10)],
                vec!["Ostmark".into(), Value::Integer(11)],
                vec!["Veyra".into(), Value::Integer(12)],
            ]
        );
    }

    #[test]
    fn left_join_pads_unmatched_left_rows() {
        let out = eval(&join_rule(JoinKind::Left));
        assert_eq!(out.rows.len(), 4);
        assert_eq!(out.rows[0], vec!["Calder".into(), Value::Null]);
    }

    #[test]
    fn full_join_keeps_both_sides() {
        let out = eval(&join_rule(JoinKind::Full));
        // 3 matches, Calder unmatched, people 13 (null region) and 14 (region 9).
        assert_eq!(out.rows.len(), 6);
        assert!(out.rows.contains(&vec![Value::Null, Value::Integer(13)]));
        assert!(out.rows.contains(&vec![Value::Null, Value::Integer(14)]));
    }

    #[test]
    fn grouped_aggregates_exclude_nulls() {
        let mut rule = join_rule(JoinKind::Left);
        rule.query.select.clear();
        rule.query.group_by = vec!["r.ancient_name".into()];
        rule.query.aggregates = vec![
            AggregateSpec::over("total_population", AggregateFunc::Count, "p.person_id"),
            AggregateSpec::over("avg_age", AggregateFunc::Avg, "p.age"),
        ];
        let out = eval(&rule);
        assert_eq!(
            out.schema.column_names(),
            vec!["ancient_name", "total_population", "avg_age"]
        );
        assert_eq!(
            out.rows,
            vec![
                vec!["Calder".into(), Value::Integer(0), Value::Null],
                vec!["Ostmark".into(), Value::Integer(2), Value::Float(30.0)],
                vec!["Veyra".into(), Value::Integer(1), Value::Float(50.0)],
            ]
        );
    }

    #[test]
    fn filter_and_derive_run_before_projection() {
        let mut query = QuerySpec::from_table(t("bronze.people"));
        query.filter = Some(Predicate::IsNotNull(Expr::col("age")));
        query.derive = vec![Derived {
            name: "age_next_year".into(),
            expr: Expr::Add(Box::new(Expr::col("age")), Box::new(Expr::lit(1))),
        }];
        query.select = vec![
            SelectItem::Column("person_id".into()),
            SelectItem::Column("age_next_year".into()),
        ];
        query.order_by = vec![OrderKey::desc("age_next_year")];
        query.limit = Some(2);
        let rule = TransformationRule::new("ages", t("silver.ages"), vec![t("bronze.people")], query);

        let out = eval(&rule);
        assert_eq!(out.schema.columns()[1].data_type, DataType::Integer);
        assert_eq!(
            out.rows,
            vec![
                vec![Value::Integer(12), Value::Integer(51)],
                vec![Value::Integer(13), Value::Integer(41)],
            ]
        );
    }

    #[test]
    fn output_is_identical_across_runs() {
        let rule = join_rule(JoinKind::Full);
        let a = eval(&rule);
        let b = eval(&rule);
        assert_eq!(
            content_hash(&a.schema, &a.rows).unwrap(),
            content_hash(&b.schema, &b.rows).unwrap()
        );
    }

    #[test]
    fn unknown_column_is_an_evaluation_error() {
        let mut rule = join_rule(JoinKind::Inner);
        rule.query.select.push(SelectItem::Column("p.shoe_size".into()));
        let err = PlanEvaluator.evaluate(&rule, &inputs()).unwrap_err();
        assert!(matches!(err, FlowError::RuleEvaluation { .. }));
        assert!(err.to_string().contains("shoe_size"));
    }

    #[test]
    fn duplicate_output_columns_are_rejected() {
        let mut rule = join_rule(JoinKind::Inner);
        rule.query.select = vec![
            SelectItem::Column("r.region_id".into()),
            SelectItem::Expr {
                name: "region_id".into(),
                expr: Expr::col("p.current_region_id"),
            },
        ];
        let err = PlanEvaluator.evaluate(&rule, &inputs()).unwrap_err();
        assert_eq!(err.kind(), "rule_evaluation");
    }

    #[test]
    fn missing_input_is_reported() {
        let rule = join_rule(JoinKind::Inner);
        let mut partial = RuleInputs::new();
        partial.insert(inputs().get(&t("bronze.regions")).unwrap().clone());
        let err = PlanEvaluator.evaluate(&rule, &partial).unwrap_err();
        assert!(err.to_string().contains("bronze.people"));
    }

    #[test]
    fn string_and_integer_keys_do_not_join() {
        let mut inputs = inputs();
        inputs.insert(handle(
            "bronze.region_biome",
            &[("region_id", DataType::String), ("biome", DataType::String)],
            vec![vec!["1".into(), "taiga".into()]],
        ));
        let mut query = QuerySpec::from_table(t("bronze.regions"));
        query.joins.push(Join {
            source: Source::table(t("bronze.region_biome")),
            kind: JoinKind::Inner,
            on: vec![("regions.region_id".into(), "region_biome.region_id".into())],
        });
        let rule = TransformationRule::new(
            "biomes",
            t("silver.biomes"),
            vec![t("bronze.regions"), t("bronze.region_biome")],
            query,
        );
        let err = PlanEvaluator.evaluate(&rule, &inputs).unwrap_err();
        assert!(err.to_string().contains("cannot join"));
    }
}
