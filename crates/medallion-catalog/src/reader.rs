//! Read handles pinned to one committed snapshot.
//!
//! A [`SnapshotHandle`] holds an `Arc` of an immutable [`Snapshot`]. Later
//! commits publish new snapshots but never touch the one a handle holds, so
//! every query through a handle sees the same rows no matter how many
//! refreshes happen in the meantime.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateSpec, group_aggregate};
use crate::error::Result;
use crate::expr::{Bindings, BoundPredicate, Expr, Predicate, QueryError};
use crate::name::TableRef;
use crate::schema::{Column, Row, Schema};
use crate::snapshot::Snapshot;
use crate::value::Value;

/// Sort key over an output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    /// Column to sort by.
    pub column: String,
    /// Sort descending instead of ascending.
    #[serde(default)]
    pub desc: bool,
}

impl OrderKey {
    /// Ascending key.
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            desc: false,
        }
    }

    /// Descending key.
    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            desc: true,
        }
    }

    /// Parses `column` or `column:desc` / `column:asc`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Invalid`] for an unknown direction.
    pub fn parse(text: &str) -> std::result::Result<Self, QueryError> {
        match text.rsplit_once(':') {
            None => Ok(Self::asc(text)),
            Some((column, dir)) => match dir.to_ascii_lowercase().as_str() {
                "asc" => Ok(Self::asc(column)),
                "desc" => Ok(Self::desc(column)),
                other => Err(QueryError::Invalid(format!(
                    "sort direction must be asc or desc, got {other}"
                ))),
            },
        }
    }
}

/// Sorts rows by resolved `(position, descending)` keys.
///
/// The sort is stable; rows equal on every key keep their input order.
pub fn sort_rows(rows: &mut [Row], keys: &[(usize, bool)]) {
    rows.sort_by(|a, b| {
        for (idx, desc) in keys {
            let ord = a[*idx].cmp(&b[*idx]);
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Resolves order keys against a schema.
///
/// # Errors
///
/// Returns [`QueryError::UnknownColumn`] for a key not in `schema`.
pub fn resolve_order(
    schema: &Schema,
    keys: &[OrderKey],
) -> std::result::Result<Vec<(usize, bool)>, QueryError> {
    keys.iter()
        .map(|k| {
            schema
                .index_of(&k.column)
                .map(|idx| (idx, k.desc))
                .ok_or_else(|| QueryError::UnknownColumn {
                    column: k.column.clone(),
                })
        })
        .collect()
}

/// A filtered, sorted, limited projection of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    /// Rows must satisfy this predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
    /// Sort keys, applied before projection.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderKey>,
    /// Maximum rows returned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Columns to return; all columns when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

impl SnapshotQuery {
    /// Query returning every row and column.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter, combined with any existing one by `and`.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            None => predicate,
            Some(Predicate::And(mut all)) => {
                all.push(predicate);
                Predicate::And(all)
            }
            Some(existing) => Predicate::And(vec![existing, predicate]),
        });
        self
    }

    /// Appends a sort key.
    #[must_use]
    pub fn order_by(mut self, key: OrderKey) -> Self {
        self.order_by.push(key);
        self
    }

    /// Limits the number of rows.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Selects the returned columns.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }
}

/// Rows produced by a read query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    /// Schema of `rows`.
    pub schema: Schema,
    /// Result rows.
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Renders rows as JSON objects keyed by column name.
    #[must_use]
    pub fn to_json_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.schema
                    .columns()
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.name.clone(), v.to_json()))
                    .collect()
            })
            .collect()
    }

    /// Returns the single value of a one-row result column.
    #[must_use]
    pub fn scalar(&self, column: &str) -> Option<&Value> {
        let idx = self.schema.index_of(column)?;
        self.rows.first().and_then(|r| r.get(idx))
    }
}

/// A read handle pinned to one committed snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotHandle {
    snapshot: Arc<Snapshot>,
}

impl SnapshotHandle {
    /// Wraps a snapshot.
    #[must_use]
    pub fn new(snapshot: Arc<Snapshot>) -> Self {
        Self { snapshot }
    }

    /// The pinned snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }

    /// The table this handle reads.
    #[must_use]
    pub fn table(&self) -> &TableRef {
        &self.snapshot.table
    }

    /// The pinned version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.snapshot.version
    }

    /// Schema of the pinned snapshot.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.snapshot.schema
    }

    /// Schema version of the pinned snapshot.
    #[must_use]
    pub fn schema_version(&self) -> u32 {
        self.snapshot.schema_version
    }

    /// Content hash of the pinned snapshot.
    #[must_use]
    pub fn content_hash(&self) -> &str {
        &self.snapshot.content_hash
    }

    /// Commit time of the pinned snapshot.
    #[must_use]
    pub fn committed_at(&self) -> DateTime<Utc> {
        self.snapshot.committed_at
    }

    /// All rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.snapshot.rows
    }

    /// Number of rows.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.snapshot.rows.len()
    }

    fn bindings(&self) -> Bindings {
        Bindings::from_schema(&self.snapshot.schema, Some(self.snapshot.table.name()))
    }

    fn bind_filter(&self, filter: Option<&Predicate>) -> Result<Option<BoundPredicate>> {
        Ok(filter.map(|p| p.bind(&self.bindings())).transpose()?)
    }

    /// Number of distinct non-null values in a column.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnknownColumn`] if the column does not exist.
    pub fn distinct_count(&self, column: &str) -> Result<usize> {
        let idx = self
            .snapshot
            .schema
            .index_of(column)
            .ok_or_else(|| QueryError::UnknownColumn {
                column: column.to_string(),
            })?;
        let distinct: HashSet<&Value> = self
            .snapshot
            .rows
            .iter()
            .map(|r| &r[idx])
            .filter(|v| !v.is_null())
            .collect();
        Ok(distinct.len())
    }

    /// Runs a filtered, sorted, limited projection.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for unknown columns or ill-typed filters.
    pub fn query(&self, query: &SnapshotQuery) -> Result<QueryResult> {
        let schema = &self.snapshot.schema;
        let filter = self.bind_filter(query.filter.as_ref())?;
        let order = resolve_order(schema, &query.order_by)?;
        let projection: Vec<usize> = match &query.columns {
            None => (0..schema.len()).collect(),
            Some(cols) => cols
                .iter()
                .map(|c| {
                    schema.index_of(c).ok_or_else(|| QueryError::UnknownColumn {
                        column: c.clone(),
                    })
                })
                .collect::<std::result::Result<_, _>>()?,
        };

        let mut rows: Vec<Row> = self
            .snapshot
            .rows
            .iter()
            .filter(|r| filter.as_ref().is_none_or(|f| f.matches(r)))
            .cloned()
            .collect();
        sort_rows(&mut rows, &order);
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        let out_schema = Schema::new(
            projection
                .iter()
                .map(|&i| schema.columns()[i].clone())
                .collect::<Vec<Column>>(),
        )?;
        let rows = rows
            .into_iter()
            .map(|row| projection.iter().map(|&i| row[i].clone()).collect())
            .collect();
        Ok(QueryResult {
            schema: out_schema,
            rows,
        })
    }

    /// Computes aggregates, optionally grouped by columns and filtered first.
    ///
    /// Without `group_by` the result is one row; groups are sorted by key.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] for unknown columns or ill-typed aggregates.
    pub fn aggregate(
        &self,
        filter: Option<&Predicate>,
        group_by: &[String],
        aggregates: &[AggregateSpec],
    ) -> Result<QueryResult> {
        let bindings = self.bindings();
        let filter = self.bind_filter(filter)?;
        let keys = group_by
            .iter()
            .map(|c| Ok((c.clone(), Expr::col(c.as_str()).bind(&bindings)?)))
            .collect::<std::result::Result<Vec<_>, QueryError>>()?;
        let aggs = aggregates
            .iter()
            .map(|a| a.bind(&bindings))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let rows = self
            .snapshot
            .rows
            .iter()
            .filter(|r| filter.as_ref().is_none_or(|f| f.matches(r)));
        let grouped = group_aggregate(rows, &keys, &aggs)?;
        Ok(QueryResult {
            schema: grouped.schema,
            rows: grouped.rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateFunc;
    use crate::snapshot::content_hash;
    use crate::value::DataType;
    use medallion_core::id::SnapshotId;

    fn handle() -> SnapshotHandle {
        let schema = Schema::new(vec![
            Column::new("region", DataType::String),
            Column::new("faction", DataType::String),
            Column::new("population", DataType::Integer),
        ])
        .unwrap();
        let rows = vec![
            vec!["north".into(), "azure".into(), Value::Integer(120)],
            vec!["south".into(), "ember".into(), Value::Integer(80)],
            vec!["east".into(), "azure".into(), Value::Null],
            vec!["west".into(), Value::Null, Value::Integer(200)],
        ];
        SnapshotHandle::new(Arc::new(Snapshot {
            table: "gold.mart_regional_analytics".parse().unwrap(),
            version: 3,
            snapshot_id: SnapshotId::generate(),
            content_hash: content_hash(&schema, &rows).unwrap(),
            schema,
            schema_version: 1,
            rows,
            input_fingerprint: None,
            committed_at: Utc::now(),
        }))
    }

    #[test]
    fn counts_rows_and_distinct_values() {
        let h = handle();
        assert_eq!(h.row_count(), 4);
        assert_eq!(h.distinct_count("faction").unwrap(), 2);
        assert!(h.distinct_count("nope").is_err());
    }

    #[test]
    fn filter_sort_limit_project() {
        let h = handle();
        let result = h
            .query(
                &SnapshotQuery::new()
                    .filter(Predicate::IsNotNull(Expr::col("population")))
                    .order_by(OrderKey::desc("population"))
                    .limit(2)
                    .columns(["region", "population"]),
            )
            .unwrap();
        assert_eq!(result.schema.column_names(), vec!["region", "population"]);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::from("west"), Value::Integer(200)],
                vec![Value::from("north"), Value::Integer(120)],
            ]
        );
    }

    #[test]
    fn qualified_filter_uses_table_name() {
        let h = handle();
        let result = h
            .query(&SnapshotQuery::new().filter(Predicate::column_eq(
                "mart_regional_analytics.faction",
                "azure",
            )))
            .unwrap();
        assert_eq!(result.rows.len(), 2);
    }

    #[test]
    fn grouped_sum_and_average() {
        let h = handle();
        let result = h
            .aggregate(
                None,
                &["faction".to_string()],
                &[
                    AggregateSpec::over("total", AggregateFunc::Sum, "population"),
                    AggregateSpec::over("avg", AggregateFunc::Avg, "population"),
                ],
            )
            .unwrap();
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Null, Value::Integer(200), Value::Float(200.0)],
                vec![Value::from("azure"), Value::Integer(120), Value::Float(120.0)],
                vec![Value::from("ember"), Value::Integer(80), Value::Float(80.0)],
            ]
        );
    }

    #[test]
    fn ungrouped_aggregate_over_empty_filter() {
        let h = handle();
        let result = h
            .aggregate(
                Some(&Predicate::column_eq("region", "nowhere")),
                &[],
                &[
                    AggregateSpec::count_rows("n"),
                    AggregateSpec::over("min", AggregateFunc::Min, "population"),
                ],
            )
            .unwrap();
        assert_eq!(result.scalar("n"), Some(&Value::Integer(0)));
        assert_eq!(result.scalar("min"), Some(&Value::Null));
    }

    #[test]
    fn order_key_parsing() {
        assert_eq!(OrderKey::parse("age:desc").unwrap(), OrderKey::desc("age"));
        assert_eq!(OrderKey::parse("age").unwrap(), OrderKey::asc("age"));
        assert!(OrderKey::parse("age:sideways").is_err());
    }
}
