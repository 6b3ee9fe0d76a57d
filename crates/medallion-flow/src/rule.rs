//! Transformation rules: one declarative query producing one table.
//!
//! A rule names its target, lists its inputs, and carries a [`QuerySpec`].
//! The tables the query reads must be exactly the declared inputs, which
//! makes the dependency graph derivable from configuration alone.
//!
//! ```json
//! {
//!   "name": "faction_mart",
//!   "target": "gold.mart_faction_analytics",
//!   "inputs": ["bronze.people"],
//!   "query": {
//!     "from": "bronze.people",
//!     "groupBy": ["current_faction"],
//!     "aggregates": [
//!       {"name": "total_population", "func": "countRows"},
//!       {"name": "avg_age", "func": "avg", "expr": {"col": "age"}}
//!     ]
//!   }
//! }
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use medallion_catalog::TableRef;
use medallion_catalog::aggregate::AggregateSpec;
use medallion_catalog::expr::{Expr, Predicate};
use medallion_catalog::reader::OrderKey;

use crate::error::{FlowError, Result};

/// A table read by a query, with the qualifier its columns bind under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SourceRepr")]
pub struct Source {
    /// Table to read.
    pub table: TableRef,
    /// Qualifier for `alias.column` references; the table name if absent.
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl Source {
    /// Reads `table` under its own name.
    #[must_use]
    pub fn table(table: TableRef) -> Self {
        Self { table, alias: None }
    }

    /// Reads `table` under `alias`.
    #[must_use]
    pub fn aliased(table: TableRef, alias: impl Into<String>) -> Self {
        Self {
            table,
            alias: Some(alias.into()),
        }
    }

    /// Qualifier the source's columns are bound under.
    #[must_use]
    pub fn qualifier(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.table.name())
    }
}

/// Accepts `"ns.table"` as shorthand for `{"table": "ns.table"}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SourceRepr {
    Name(TableRef),
    Full {
        table: TableRef,
        #[serde(rename = "as", default)]
        alias: Option<String>,
    },
}

impl From<SourceRepr> for Source {
    fn from(repr: SourceRepr) -> Self {
        match repr {
            SourceRepr::Name(table) => Self::table(table),
            SourceRepr::Full { table, alias } => Self { table, alias },
        }
    }
}

/// Join flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    /// Only matching pairs.
    #[default]
    Inner,
    /// Every left row, padded with nulls when unmatched.
    Left,
    /// Every row of both sides, padded with nulls when unmatched.
    Full,
}

/// An equality join against one more table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Join {
    /// Joined table.
    #[serde(flatten)]
    pub source: Source,
    /// Join flavour.
    #[serde(default)]
    pub kind: JoinKind,
    /// Key pairs: a column already in scope, then a column of the joined table.
    pub on: Vec<(String, String)>,
}

/// A computed column appended before grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Derived {
    /// Output column name.
    pub name: String,
    /// Value expression.
    pub expr: Expr,
}

/// One output column of the final projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectItem {
    /// A column kept under its unqualified name.
    Column(String),
    /// A named expression.
    Expr {
        /// Output column name.
        name: String,
        /// Value expression.
        expr: Expr,
    },
}

impl SelectItem {
    /// Output column name.
    #[must_use]
    pub fn output_name(&self) -> &str {
        match self {
            Self::Column(reference) => unqualified(reference),
            Self::Expr { name, .. } => name,
        }
    }
}

/// Declarative query over input snapshots.
///
/// Stages run in this order: `from` and `joins`, `filter`, `derive`,
/// `groupBy` with `aggregates`, `select`, `orderBy`, `limit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    /// Driving table.
    pub from: Source,
    /// Joined tables, applied left to right.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<Join>,
    /// Row filter applied after the joins.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
    /// Computed columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derive: Vec<Derived>,
    /// Grouping columns; output under their unqualified names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// Aggregates computed per group.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aggregates: Vec<AggregateSpec>,
    /// Final projection; every column when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub select: Vec<SelectItem>,
    /// Output ordering; when empty rows are sorted by every column.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderKey>,
    /// Maximum output rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl QuerySpec {
    /// Query over one table with every other stage empty.
    #[must_use]
    pub fn from_table(table: TableRef) -> Self {
        Self {
            from: Source::table(table),
            joins: Vec::new(),
            filter: None,
            derive: Vec::new(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
            select: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    /// Every source the query reads, `from` first.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        std::iter::once(&self.from).chain(self.joins.iter().map(|j| &j.source))
    }

    /// Whether the query groups or aggregates.
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregates.is_empty()
    }
}

/// A named mapping from input tables to one target table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRule {
    /// Unique rule name.
    pub name: String,
    /// Table the rule produces.
    pub target: TableRef,
    /// Tables the rule reads.
    pub inputs: Vec<TableRef>,
    /// The query.
    pub query: QuerySpec,
    /// Accept schema changes that are not additive, bumping the schema
    /// version instead of failing with a schema conflict.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub allow_schema_change: bool,
}

impl TransformationRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        target: TableRef,
        inputs: Vec<TableRef>,
        query: QuerySpec,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            inputs,
            query,
            allow_schema_change: false,
        }
    }

    /// Checks that the query reads exactly the declared inputs and that
    /// its qualifiers are unambiguous.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::UndeclaredInput`], [`FlowError::UnusedInput`] or
    /// [`FlowError::InvalidRule`].
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("rule name is empty"));
        }
        let declared: BTreeSet<&TableRef> = self.inputs.iter().collect();
        if declared.len() != self.inputs.len() {
            return Err(self.invalid("inputs list a table more than once"));
        }

        let mut qualifiers = BTreeSet::new();
        let mut read = BTreeSet::new();
        for source in self.query.sources() {
            if !qualifiers.insert(source.qualifier()) {
                return Err(self.invalid(format!(
                    "qualifier {} is used twice; alias one of the sources",
                    source.qualifier()
                )));
            }
            if !declared.contains(&source.table) {
                return Err(FlowError::UndeclaredInput {
                    rule: self.name.clone(),
                    table: source.table.to_string(),
                });
            }
            read.insert(&source.table);
        }
        if let Some(unused) = self.inputs.iter().find(|t| !read.contains(t)) {
            return Err(FlowError::UnusedInput {
                rule: self.name.clone(),
                table: unused.to_string(),
            });
        }

        for join in &self.query.joins {
            if join.on.is_empty() {
                return Err(self.invalid(format!(
                    "join with {} has no key columns",
                    join.source.table
                )));
            }
        }
        Ok(())
    }

    /// Stable hash of the rule definition.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::Serialization`] if the rule cannot be encoded.
    pub fn definition_hash(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self).map_err(|e| FlowError::Serialization {
            message: format!("rule {}: {e}", self.name),
        })?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&bytes))))
    }

    fn invalid(&self, message: impl Into<String>) -> FlowError {
        FlowError::InvalidRule {
            rule: self.name.clone(),
            message: message.into(),
        }
    }
}

/// Strips a `qualifier.` prefix.
pub(crate) fn unqualified(reference: &str) -> &str {
    reference
        .split_once('.')
        .map_or(reference, |(_, column)| column)
}
