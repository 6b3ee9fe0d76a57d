//! Aggregate functions and grouping.
//!
//! Null handling follows SQL: `NULL` inputs never contribute, counts over no
//! contributing rows are `0`, and every other aggregate over no contributing
//! rows is `NULL`.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::expr::{Bindings, BoundExpr, Expr, QueryError};
use crate::schema::{Column, Row, Schema};
use crate::value::{DataType, Value};

/// Supported aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregateFunc {
    /// Number of non-null values.
    Count,
    /// Number of rows, nulls included.
    CountRows,
    /// Number of distinct non-null values.
    CountDistinct,
    /// Sum of non-null numbers.
    Sum,
    /// Mean of non-null numbers.
    Avg,
    /// Smallest non-null value.
    Min,
    /// Largest non-null value.
    Max,
}

impl AggregateFunc {
    /// Parses the lowercase or camelCase name used on the command line.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(Self::Count),
            "countrows" | "count_rows" | "rows" => Some(Self::CountRows),
            "countdistinct" | "count_distinct" | "distinct" => Some(Self::CountDistinct),
            "sum" => Some(Self::Sum),
            "avg" | "mean" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }
}

/// A named aggregate over an optional input expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    /// Output column name.
    pub name: String,
    /// Function to apply.
    pub func: AggregateFunc,
    /// Input expression; omitted only for `countRows`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<Expr>,
}

impl AggregateSpec {
    /// Creates an aggregate over a column.
    #[must_use]
    pub fn over(name: impl Into<String>, func: AggregateFunc, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func,
            expr: Some(Expr::col(column)),
        }
    }

    /// Creates a `countRows` aggregate.
    #[must_use]
    pub fn count_rows(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            func: AggregateFunc::CountRows,
            expr: None,
        }
    }

    /// Binds the input expression and derives the output type.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the input is missing, unresolvable, or not
    /// numeric for `sum` and `avg`.
    pub fn bind(&self, bindings: &Bindings) -> Result<BoundAggregate, QueryError> {
        let expr = match (&self.expr, self.func) {
            (None, AggregateFunc::CountRows) => None,
            (None, func) => {
                return Err(QueryError::Invalid(format!(
                    "aggregate {} ({func:?}) needs an input expression",
                    self.name
                )));
            }
            (Some(e), _) => Some(e.bind(bindings)?),
        };
        let input_type = expr.as_ref().map(BoundExpr::data_type);
        let output_type = match self.func {
            AggregateFunc::Count | AggregateFunc::CountRows | AggregateFunc::CountDistinct => {
                DataType::Integer
            }
            AggregateFunc::Sum | AggregateFunc::Avg => {
                let t = input_type.unwrap_or(DataType::Integer);
                if !t.is_numeric() {
                    return Err(QueryError::TypeMismatch {
                        message: format!("{} expects numbers, got {t}", self.name),
                    });
                }
                if self.func == AggregateFunc::Avg { DataType::Float } else { t }
            }
            AggregateFunc::Min | AggregateFunc::Max => input_type.unwrap_or(DataType::String),
        };
        Ok(BoundAggregate {
            name: self.name.clone(),
            func: self.func,
            expr,
            output_type,
        })
    }
}

/// An aggregate resolved against input bindings.
#[derive(Debug, Clone)]
pub struct BoundAggregate {
    name: String,
    func: AggregateFunc,
    expr: Option<BoundExpr>,
    output_type: DataType,
}

impl BoundAggregate {
    /// Output column of this aggregate.
    #[must_use]
    pub fn column(&self) -> Column {
        Column::new(self.name.clone(), self.output_type)
    }

    /// Starts a fresh accumulator.
    #[must_use]
    pub fn accumulator(&self) -> Accumulator {
        let state = match (self.func, self.output_type) {
            (AggregateFunc::Count | AggregateFunc::CountRows, _) => State::Count(0),
            (AggregateFunc::CountDistinct, _) => State::Distinct(HashSet::new()),
            (AggregateFunc::Sum, DataType::Integer) => State::SumInt {
                total: 0,
                seen: false,
            },
            (AggregateFunc::Sum, _) => State::SumFloat {
                total: 0.0,
                seen: false,
            },
            (AggregateFunc::Avg, _) => State::Avg { total: 0.0, n: 0 },
            (AggregateFunc::Min, _) => State::Min(None),
            (AggregateFunc::Max, _) => State::Max(None),
        };
        Accumulator {
            func: self.func,
            state,
        }
    }

    fn input(&self, row: &[Value]) -> Value {
        self.expr.as_ref().map_or(Value::Null, |e| e.eval(row))
    }
}

/// Running state of one aggregate.
#[derive(Debug, Clone)]
pub struct Accumulator {
    func: AggregateFunc,
    state: State,
}

#[derive(Debug, Clone)]
enum State {
    Count(i64),
    Distinct(HashSet<Value>),
    SumInt { total: i128, seen: bool },
    SumFloat { total: f64, seen: bool },
    Avg { total: f64, n: u64 },
    Min(Option<Value>),
    Max(Option<Value>),
}

impl Accumulator {
    /// Feeds one input value.
    pub fn update(&mut self, value: Value) {
        if self.func == AggregateFunc::CountRows {
            if let State::Count(n) = &mut self.state {
                *n += 1;
            }
            return;
        }
        if value.is_null() {
            return;
        }
        match &mut self.state {
            State::Count(n) => *n += 1,
            State::Distinct(set) => {
                set.insert(value);
            }
            State::SumInt { total, seen } => {
                if let Value::Integer(i) = value {
                    *total += i128::from(i);
                    *seen = true;
                }
            }
            State::SumFloat { total, seen } => {
                if let Some(x) = value.as_f64() {
                    *total += x;
                    *seen = true;
                }
            }
            State::Avg { total, n } => {
                if let Some(x) = value.as_f64() {
                    *total += x;
                    *n += 1;
                }
            }
            State::Min(current) => {
                if current.as_ref().is_none_or(|c| value < *c) {
                    *current = Some(value);
                }
            }
            State::Max(current) => {
                if current.as_ref().is_none_or(|c| value > *c) {
                    *current = Some(value);
                }
            }
        }
    }

    /// Produces the aggregate's value.
    ///
    /// An integer sum that overflows `i64` yields `NULL`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(self) -> Value {
        match self.state {
            State::Count(n) => Value::Integer(n),
            State::Distinct(set) => Value::Integer(i64::try_from(set.len()).unwrap_or(i64::MAX)),
            State::SumInt { total, seen } => {
                if seen {
                    i64::try_from(total).map_or(Value::Null, Value::Integer)
                } else {
                    Value::Null
                }
            }
            State::SumFloat { total, seen } => {
                if seen && total.is_finite() {
                    Value::Float(total)
                } else {
                    Value::Null
                }
            }
            State::Avg { total, n } => {
                if n == 0 {
                    Value::Null
                } else {
                    Value::Float(total / n as f64)
                }
            }
            State::Min(v) | State::Max(v) => v.unwrap_or(Value::Null),
        }
    }
}

/// Output of [`group_aggregate`]: key columns then aggregate columns.
#[derive(Debug, Clone)]
pub struct Grouped {
    /// Output schema.
    pub schema: Schema,
    /// Output rows, sorted by group key.
    pub rows: Vec<Row>,
}

/// Groups `rows` by `keys` and computes `aggregates` per group.
///
/// Without keys the result is exactly one row, even for empty input. With
/// keys, groups come out in ascending key order.
///
/// # Errors
///
/// Returns [`QueryError::Invalid`] if output column names collide.
pub fn group_aggregate<'a>(
    rows: impl IntoIterator<Item = &'a Row>,
    keys: &[(String, BoundExpr)],
    aggregates: &[BoundAggregate],
) -> Result<Grouped, QueryError> {
    let columns: Vec<Column> = keys
        .iter()
        .map(|(name, e)| Column::new(name.clone(), e.data_type()))
        .chain(aggregates.iter().map(BoundAggregate::column))
        .collect();
    let schema = Schema::new(columns).map_err(|e| QueryError::Invalid(e.to_string()))?;

    let fresh = || {
        aggregates
            .iter()
            .map(BoundAggregate::accumulator)
            .collect::<Vec<_>>()
    };
    let mut groups: BTreeMap<Vec<Value>, Vec<Accumulator>> = BTreeMap::new();
    if keys.is_empty() {
        groups.insert(Vec::new(), fresh());
    }

    for row in rows {
        let key: Vec<Value> = keys.iter().map(|(_, e)| e.eval(row)).collect();
        let accs = groups.entry(key).or_insert_with(fresh);
        for (acc, agg) in accs.iter_mut().zip(aggregates) {
            acc.update(agg.input(row));
        }
    }

    let rows = groups
        .into_iter()
        .map(|(mut key, accs)| {
            key.extend(accs.into_iter().map(Accumulator::finish));
            key
        })
        .collect();
    Ok(Grouped { schema, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bindings() -> Bindings {
        let schema = Schema::new(vec![
            Column::new("region", DataType::String),
            Column::new("age", DataType::Integer),
        ])
        .unwrap();
        Bindings::from_schema(&schema, None)
    }

    fn bind(specs: &[AggregateSpec]) -> Vec<BoundAggregate> {
        let b = bindings();
        specs.iter().map(|s| s.bind(&b).unwrap()).collect()
    }

    fn all_aggregates() -> Vec<BoundAggregate> {
        bind(&[
            AggregateSpec::count_rows("rows"),
            AggregateSpec::over("n", AggregateFunc::Count, "age"),
            AggregateSpec::over("d", AggregateFunc::CountDistinct, "age"),
            AggregateSpec::over("sum", AggregateFunc::Sum, "age"),
            AggregateSpec::over("avg", AggregateFunc::Avg, "age"),
            AggregateSpec::over("min", AggregateFunc::Min, "age"),
            AggregateSpec::over("max", AggregateFunc::Max, "age"),
        ])
    }

    #[test]
    fn empty_input_gives_zero_counts_and_null_aggregates() {
        let grouped = group_aggregate(&[], &[], &all_aggregates()).unwrap();
        assert_eq!(
            grouped.rows,
            vec![vec![
                Value::Integer(0),
                Value::Integer(0),
                Value::Integer(0),
                Value::Null,
                Value::Null,
                Value::Null,
                Value::Null,
            ]]
        );
    }

    #[test]
    fn nulls_are_excluded_from_counts_and_averages() {
        let rows = vec![
            vec![Value::from("a"), Value::Integer(10)],
            vec![Value::from("a"), Value::Null],
            vec![Value::from("a"), Value::Integer(20)],
            vec![Value::from("a"), Value::Integer(20)],
        ];
        let grouped = group_aggregate(&rows, &[], &all_aggregates()).unwrap();
        let row = &grouped.rows[0];
        assert_eq!(row[0], Value::Integer(4));
        assert_eq!(row[1], Value::Integer(3));
        assert_eq!(row[2], Value::Integer(2));
        assert_eq!(row[3], Value::Integer(50));
        assert_eq!(row[4], Value::Float(50.0 / 3.0));
        assert_eq!(row[5], Value::Integer(10));
        assert_eq!(row[6], Value::Integer(20));
    }

    #[test]
    fn all_null_group_yields_null_average() {
        let rows = vec![vec![Value::from("a"), Value::Null]];
        let grouped = group_aggregate(&rows, &[], &all_aggregates()).unwrap();
        assert_eq!(grouped.rows[0][1], Value::Integer(0));
        assert_eq!(grouped.rows[0][4], Value::Null);
    }

    #[test]
    fn groups_are_sorted_by_key() {
        let b = bindings();
        let keys = vec![("region".to_string(), Expr::col("region").bind(&b).unwrap())];
        let rows = vec![
            vec![Value::from("south"), Value::Integer(1)],
            vec![Value::from("north"), Value::Integer(2)],
            vec![Value::Null, Value::Integer(3)],
            vec![Value::from("north"), Value::Integer(4)],
        ];
        let grouped = group_aggregate(
            &rows,
            &keys,
            &bind(&[AggregateSpec::over("total", AggregateFunc::Sum, "age")]),
        )
        .unwrap();
        assert_eq!(grouped.schema.column_names(), vec!["region", "total"]);
        assert_eq!(
            grouped.rows,
            vec![
                vec![Value::Null, Value::Integer(3)],
                vec![Value::from("north"), Value::Integer(6)],
                vec![Value::from("south"), Value::Integer(1)],
            ]
        );
    }

    #[test]
    fn sum_of_strings_is_rejected() {
        let err = AggregateSpec::over("s", AggregateFunc::Sum, "region")
            .bind(&bindings())
            .unwrap_err();
        assert!(matches!(err, QueryError::TypeMismatch { .. }));
    }

    #[test]
    fn aggregate_spec_parses_from_json() {
        let spec: AggregateSpec =
            serde_json::from_str(r#"{"name": "regions_present", "func": "countDistinct", "expr": {"col": "region"}}"#)
                .unwrap();
        assert_eq!(spec.func, AggregateFunc::CountDistinct);
        assert_eq!(AggregateFunc::parse("AVG"), Some(AggregateFunc::Avg));
    }

    proptest! {
        #[test]
        fn count_plus_nulls_is_row_count(ages in proptest::collection::vec(proptest::option::of(-1000i64..1000), 0..40)) {
            let rows: Vec<Row> = ages
                .iter()
                .map(|a| vec![Value::from("r"), Value::from(*a)])
                .collect();
            let grouped = group_aggregate(&rows, &[], &all_aggregates()).unwrap();
            let nulls = ages.iter().filter(|a| a.is_none()).count();
            let Value::Integer(count) = grouped.rows[0][1] else { panic!("count") };
            let Value::Integer(total) = grouped.rows[0][0] else { panic!("rows") };
            prop_assert_eq!(usize::try_from(count).unwrap() + nulls, usize::try_from(total).unwrap());
            prop_assert_eq!(grouped.rows[0][4].is_null(), count == 0);
        }
    }
}
