//! Declarative expressions and predicates over rows.
//!
//! Expressions are plain serde data so they can live in pipeline definitions:
//!
//! ```json
//! {"div": [{"col": "total_age"}, {"col": "people"}]}
//! {"and": [{"isNotNull": {"col": "age"}}, {"ge": [{"col": "age"}, {"lit": 18}]}]}
//! ```
//!
//! Before evaluation an expression is bound against [`Bindings`], which
//! resolves column names to row positions and checks operand types once.
//! Arithmetic propagates `NULL`, and division by zero yields `NULL`.
//! Predicates use three-valued logic: a comparison involving `NULL` is
//! unknown, and filters keep only rows where the predicate is true.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::Schema;
use crate::value::{DataType, Value};

/// Errors raised while binding or evaluating a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A referenced column does not exist.
    #[error("unknown column: {column}")]
    UnknownColumn {
        /// The unresolved reference.
        column: String,
    },

    /// A column reference matches more than one input column.
    #[error("ambiguous column: {column} (qualify it as table.column)")]
    AmbiguousColumn {
        /// The ambiguous reference.
        column: String,
    },

    /// Operand types are incompatible.
    #[error("type mismatch: {message}")]
    TypeMismatch {
        /// Description of the mismatch.
        message: String,
    },

    /// The query is structurally invalid.
    #[error("invalid query: {0}")]
    Invalid(String),
}

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    /// Column reference, optionally qualified as `table.column`.
    Col(String),
    /// JSON literal.
    Lit(serde_json::Value),
    /// Addition.
    Add(Box<Expr>, Box<Expr>),
    /// Subtraction.
    Sub(Box<Expr>, Box<Expr>),
    /// Multiplication.
    Mul(Box<Expr>, Box<Expr>),
    /// Division; always a float, `NULL` on a zero divisor.
    Div(Box<Expr>, Box<Expr>),
    /// Rounds a number to `digits` decimal places.
    Round {
        /// Number to round.
        expr: Box<Expr>,
        /// Decimal places to keep.
        #[serde(default)]
        digits: i32,
    },
    /// First non-null argument.
    Coalesce(Vec<Expr>),
    /// First branch whose condition holds, else the fallback.
    Case {
        /// Branches, tried in order.
        when: Vec<WhenClause>,
        /// Value when no branch matches; `NULL` if absent.
        #[serde(rename = "else", default, skip_serializing_if = "Option::is_none")]
        otherwise: Option<Box<Expr>>,
    },
}

impl Expr {
    /// Column reference.
    #[must_use]
    pub fn col(name: impl Into<String>) -> Self {
        Self::Col(name.into())
    }

    /// Literal value.
    #[must_use]
    pub fn lit(value: impl Into<serde_json::Value>) -> Self {
        Self::Lit(value.into())
    }

    /// Adds every table qualifier this expression references to `out`.
    pub fn collect_qualifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Col(name) => {
                if let Some((qualifier, _)) = name.split_once('.') {
                    out.push(qualifier);
                }
            }
            Self::Lit(_) => {}
            Self::Add(a, b) | Self::Sub(a, b) | Self::Mul(a, b) | Self::Div(a, b) => {
                a.collect_qualifiers(out);
                b.collect_qualifiers(out);
            }
            Self::Round { expr, .. } => expr.collect_qualifiers(out),
            Self::Coalesce(args) => args.iter().for_each(|a| a.collect_qualifiers(out)),
            Self::Case { when, otherwise } => {
                for clause in when {
                    clause.condition.collect_qualifiers(out);
                    clause.then.collect_qualifiers(out);
                }
                if let Some(e) = otherwise {
                    e.collect_qualifiers(out);
                }
            }
        }
    }

    /// Resolves columns and checks types against `bindings`.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] for unknown or ambiguous columns and for
    /// operands of incompatible types.
    pub fn bind(&self, bindings: &Bindings) -> Result<BoundExpr, QueryError> {
        match self {
            Self::Col(name) => {
                let idx = bindings.resolve(name)?;
                Ok(BoundExpr {
                    node: Node::Column(idx),
                    data_type: Some(bindings.columns[idx].data_type),
                })
            }
            Self::Lit(json) => {
                let value = Value::from_literal(json);
                Ok(BoundExpr {
                    data_type: value.data_type(),
                    node: Node::Literal(value),
                })
            }
            Self::Add(a, b) => bind_arith(ArithOp::Add, a, b, bindings),
            Self::Sub(a, b) => bind_arith(ArithOp::Sub, a, b, bindings),
            Self::Mul(a, b) => bind_arith(ArithOp::Mul, a, b, bindings),
            Self::Div(a, b) => bind_arith(ArithOp::Div, a, b, bindings),
            Self::Round { expr, digits } => {
                let inner = expr.bind(bindings)?;
                require_numeric(inner.data_type, "round")?;
                Ok(BoundExpr {
                    node: Node::Round(Box::new(inner), *digits),
                    data_type: Some(DataType::Float),
                })
            }
            Self::Coalesce(args) => {
                if args.is_empty() {
                    return Err(QueryError::Invalid("coalesce needs arguments".into()));
                }
                let bound = args
                    .iter()
                    .map(|a| a.bind(bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                let data_type = unify_all(bound.iter().map(|b| b.data_type), "coalesce")?;
                Ok(BoundExpr {
                    node: Node::Coalesce(bound),
                    data_type,
                })
            }
            Self::Case { when, otherwise } => {
                if when.is_empty() {
                    return Err(QueryError::Invalid("case needs at least one branch".into()));
                }
                let mut branches = Vec::with_capacity(when.len());
                for clause in when {
                    branches.push((clause.condition.bind(bindings)?, clause.then.bind(bindings)?));
                }
                let fallback = otherwise
                    .as_ref()
                    .map(|e| e.bind(bindings))
                    .transpose()?;
                let data_type = unify_all(
                    branches
                        .iter()
                        .map(|(_, e)| e.data_type)
                        .chain(fallback.iter().map(|e| e.data_type)),
                    "case",
                )?;
                Ok(BoundExpr {
                    node: Node::Case(branches, fallback.map(Box::new)),
                    data_type,
                })
            }
        }
    }
}

/// One `case` branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenClause {
    /// Condition to test.
    #[serde(rename = "if")]
    pub condition: Predicate,
    /// Value when the condition holds.
    pub then: Expr,
}

/// A boolean condition over a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Predicate {
    /// Equal.
    Eq(Expr, Expr),
    /// Not equal.
    Ne(Expr, Expr),
    /// Less than.
    Lt(Expr, Expr),
    /// Less than or equal.
    Le(Expr, Expr),
    /// Greater than.
    Gt(Expr, Expr),
    /// Greater than or equal.
    Ge(Expr, Expr),
    /// True when the value is `NULL`.
    IsNull(Expr),
    /// True when the value is not `NULL`.
    IsNotNull(Expr),
    /// All conditions hold.
    And(Vec<Predicate>),
    /// Any condition holds.
    Or(Vec<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
    /// Membership in a literal list.
    In {
        /// Tested value.
        expr: Expr,
        /// Candidate literals.
        values: Vec<serde_json::Value>,
    },
}

impl Predicate {
    /// Equality predicate between a column and a literal.
    #[must_use]
    pub fn column_eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Eq(Expr::col(column), Expr::lit(value))
    }

    /// Adds every table qualifier this predicate references to `out`.
    pub fn collect_qualifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Eq(a, b)
            | Self::Ne(a, b)
            | Self::Lt(a, b)
            | Self::Le(a, b)
            | Self::Gt(a, b)
            | Self::Ge(a, b) => {
                a.collect_qualifiers(out);
                b.collect_qualifiers(out);
            }
            Self::IsNull(e) | Self::IsNotNull(e) | Self::In { expr: e, .. } => {
                e.collect_qualifiers(out);
            }
            Self::And(ps) | Self::Or(ps) => ps.iter().for_each(|p| p.collect_qualifiers(out)),
            Self::Not(p) => p.collect_qualifiers(out),
        }
    }

    /// Resolves columns and checks comparison types against `bindings`.
    ///
    /// # Errors
    ///
    /// Returns a [`QueryError`] for unknown columns or incomparable operands.
    pub fn bind(&self, bindings: &Bindings) -> Result<BoundPredicate, QueryError> {
        let compare = |op: CmpOp, a: &Expr, b: &Expr| -> Result<BoundPredicate, QueryError> {
            let left = a.bind(bindings)?;
            let right = b.bind(bindings)?;
            check_comparable(left.data_type, right.data_type)?;
            Ok(BoundPredicate(PredNode::Compare(op, left, right)))
        };
        match self {
            Self::Eq(a, b) => compare(CmpOp::Eq, a, b),
            Self::Ne(a, b) => compare(CmpOp::Ne, a, b),
            Self::Lt(a, b) => compare(CmpOp::Lt, a, b),
            Self::Le(a, b) => compare(CmpOp::Le, a, b),
            Self::Gt(a, b) => compare(CmpOp::Gt, a, b),
            Self::Ge(a, b) => compare(CmpOp::Ge, a, b),
            Self::IsNull(e) => Ok(BoundPredicate(PredNode::IsNull(e.bind(bindings)?, true))),
            Self::IsNotNull(e) => Ok(BoundPredicate(PredNode::IsNull(e.bind(bindings)?, false))),
            Self::And(ps) => Ok(BoundPredicate(PredNode::And(
                ps.iter()
                    .map(|p| p.bind(bindings))
                    .collect::<Result<_, _>>()?,
            ))),
            Self::Or(ps) => Ok(BoundPredicate(PredNode::Or(
                ps.iter()
                    .map(|p| p.bind(bindings))
                    .collect::<Result<_, _>>()?,
            ))),
            Self::Not(p) => Ok(BoundPredicate(PredNode::Not(Box::new(p.bind(bindings)?)))),
            Self::In { expr, values } => {
                let bound = expr.bind(bindings)?;
                let values: Vec<Value> = values.iter().map(Value::from_literal).collect();
                for v in &values {
                    check_comparable(bound.data_type, v.data_type())?;
                }
                Ok(BoundPredicate(PredNode::In(bound, values)))
            }
        }
    }
}

/// A column visible to expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    /// Table alias the column came from, if any.
    pub qualifier: Option<String>,
    /// Column name.
    pub name: String,
    /// Column type.
    pub data_type: DataType,
}

/// The columns of a row, in position order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    columns: Vec<Binding>,
}

impl Bindings {
    /// Bindings for the columns of `schema`, optionally qualified.
    #[must_use]
    pub fn from_schema(schema: &Schema, qualifier: Option<&str>) -> Self {
        Self {
            columns: schema
                .columns()
                .iter()
                .map(|c| Binding {
                    qualifier: qualifier.map(str::to_string),
                    name: c.name.clone(),
                    data_type: c.data_type,
                })
                .collect(),
        }
    }

    /// Appends `other`'s columns after `self`'s, as in a join.
    #[must_use]
    pub fn concat(mut self, other: Self) -> Self {
        self.columns.extend(other.columns);
        self
    }

    /// Appends one column.
    pub fn push(&mut self, binding: Binding) {
        self.columns.push(binding);
    }

    /// Returns the bound columns.
    #[must_use]
    pub fn columns(&self) -> &[Binding] {
        &self.columns
    }

    /// Returns the number of bound columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Resolves a column reference to its position.
    ///
    /// `table.column` matches the qualified column; a bare name must match
    /// exactly one column across all tables.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::UnknownColumn`] or [`QueryError::AmbiguousColumn`].
    pub fn resolve(&self, reference: &str) -> Result<usize, QueryError> {
        let mut matches: Vec<usize> = match reference.split_once('.') {
            Some((qualifier, name)) => self
                .columns
                .iter()
                .enumerate()
                .filter(|(_, b)| b.qualifier.as_deref() == Some(qualifier) && b.name == name)
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        };
        if matches.is_empty() {
            matches = self
                .columns
                .iter()
                .enumerate()
                .filter(|(_, b)| b.name == reference)
                .map(|(i, _)| i)
                .collect();
        }
        match matches.as_slice() {
            [idx] => Ok(*idx),
            [] => Err(QueryError::UnknownColumn {
                column: reference.to_string(),
            }),
            _ => Err(QueryError::AmbiguousColumn {
                column: reference.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn test(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Column(usize),
    Literal(Value),
    Arith(ArithOp, Box<BoundExpr>, Box<BoundExpr>),
    Round(Box<BoundExpr>, i32),
    Coalesce(Vec<BoundExpr>),
    Case(Vec<(BoundPredicate, BoundExpr)>, Option<Box<BoundExpr>>),
}

/// An expression resolved against [`Bindings`].
#[derive(Debug, Clone)]
pub struct BoundExpr {
    node: Node,
    data_type: Option<DataType>,
}

impl BoundExpr {
    /// Result type; an untyped `NULL` literal reports `String`.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type.unwrap_or(DataType::String)
    }

    /// Evaluates the expression against one row.
    #[must_use]
    pub fn eval(&self, row: &[Value]) -> Value {
        let value = match &self.node {
            Node::Column(idx) => row.get(*idx).cloned().unwrap_or(Value::Null),
            Node::Literal(v) => v.clone(),
            Node::Arith(op, a, b) => arith(*op, &a.eval(row), &b.eval(row)),
            Node::Round(e, digits) => round(&e.eval(row), *digits),
            Node::Coalesce(args) => args
                .iter()
                .map(|a| a.eval(row))
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null),
            Node::Case(branches, otherwise) => branches
                .iter()
                .find(|(cond, _)| cond.eval(row) == Some(true))
                .map(|(_, then)| then.eval(row))
                .or_else(|| otherwise.as_ref().map(|e| e.eval(row)))
                .unwrap_or(Value::Null),
        };
        conform(value, self.data_type)
    }
}

/// A predicate resolved against [`Bindings`].
#[derive(Debug, Clone)]
pub struct BoundPredicate(PredNode);

#[derive(Debug, Clone)]
enum PredNode {
    Compare(CmpOp, BoundExpr, BoundExpr),
    IsNull(BoundExpr, bool),
    And(Vec<BoundPredicate>),
    Or(Vec<BoundPredicate>),
    Not(Box<BoundPredicate>),
    In(BoundExpr, Vec<Value>),
}

impl BoundPredicate {
    /// Evaluates with three-valued logic; `None` means unknown.
    #[must_use]
    pub fn eval(&self, row: &[Value]) -> Option<bool> {
        match &self.0 {
            PredNode::Compare(op, a, b) => a.eval(row).sql_cmp(&b.eval(row)).map(|o| op.test(o)),
            PredNode::IsNull(e, want_null) => Some(e.eval(row).is_null() == *want_null),
            PredNode::And(ps) => {
                let mut unknown = false;
                for p in ps {
                    match p.eval(row) {
                        Some(false) => return Some(false),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                if unknown { None } else { Some(true) }
            }
            PredNode::Or(ps) => {
                let mut unknown = false;
                for p in ps {
                    match p.eval(row) {
                        Some(true) => return Some(true),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                if unknown { None } else { Some(false) }
            }
            PredNode::Not(p) => p.eval(row).map(|b| !b),
            PredNode::In(e, values) => {
                let value = e.eval(row);
                if value.is_null() {
                    return None;
                }
                let mut unknown = false;
                for candidate in values {
                    match value.sql_cmp(candidate) {
                        Some(Ordering::Equal) => return Some(true),
                        None => unknown = true,
                        Some(_) => {}
                    }
                }
                if unknown { None } else { Some(false) }
            }
        }
    }

    /// Returns true only when the predicate definitely holds.
    #[must_use]
    pub fn matches(&self, row: &[Value]) -> bool {
        self.eval(row) == Some(true)
    }
}

fn bind_arith(
    op: ArithOp,
    a: &Expr,
    b: &Expr,
    bindings: &Bindings,
) -> Result<BoundExpr, QueryError> {
    let left = a.bind(bindings)?;
    let right = b.bind(bindings)?;
    let name = match op {
        ArithOp::Add => "add",
        ArithOp::Sub => "sub",
        ArithOp::Mul => "mul",
        ArithOp::Div => "div",
    };
    require_numeric(left.data_type, name)?;
    require_numeric(right.data_type, name)?;
    let data_type = match (op, left.data_type, right.data_type) {
        (ArithOp::Div, _, _) => DataType::Float,
        (_, Some(DataType::Integer) | None, Some(DataType::Integer) | None) => DataType::Integer,
        _ => DataType::Float,
    };
    Ok(BoundExpr {
        node: Node::Arith(op, Box::new(left), Box::new(right)),
        data_type: Some(data_type),
    })
}

fn require_numeric(data_type: Option<DataType>, operation: &str) -> Result<(), QueryError> {
    match data_type {
        None => Ok(()),
        Some(t) if t.is_numeric() => Ok(()),
        Some(t) => Err(QueryError::TypeMismatch {
            message: format!("{operation} expects numbers, got {t}"),
        }),
    }
}

fn check_comparable(a: Option<DataType>, b: Option<DataType>) -> Result<(), QueryError> {
    let ok = match (a, b) {
        (None, _) | (_, None) => true,
        (Some(x), Some(y)) => {
            x == y
                || (x.is_numeric() && y.is_numeric())
                || matches!(
                    (x, y),
                    (DataType::Date, DataType::String) | (DataType::String, DataType::Date)
                )
        }
    };
    if ok {
        Ok(())
    } else {
        Err(QueryError::TypeMismatch {
            message: format!(
                "cannot compare {} with {}",
                a.unwrap_or(DataType::String),
                b.unwrap_or(DataType::String)
            ),
        })
    }
}

fn unify_all(
    types: impl Iterator<Item = Option<DataType>>,
    operation: &str,
) -> Result<Option<DataType>, QueryError> {
    let mut result: Option<DataType> = None;
    for t in types.flatten() {
        result = match result {
            None => Some(t),
            Some(current) if current == t => Some(current),
            Some(current) if current.is_numeric() && t.is_numeric() => Some(DataType::Float),
            Some(current) => {
                return Err(QueryError::TypeMismatch {
                    message: format!("{operation} mixes {current} and {t}"),
                });
            }
        };
    }
    Ok(result)
}

#[allow(clippy::cast_precision_loss)]
fn conform(value: Value, data_type: Option<DataType>) -> Value {
    match (value, data_type) {
        (Value::Integer(i), Some(DataType::Float)) => Value::Float(i as f64),
        (value, _) => value,
    }
}

fn arith(op: ArithOp, a: &Value, b: &Value) -> Value {
    if let (Value::Integer(x), Value::Integer(y), false) = (a, b, op == ArithOp::Div) {
        let result = match op {
            ArithOp::Add => x.checked_add(*y),
            ArithOp::Sub => x.checked_sub(*y),
            ArithOp::Mul => x.checked_mul(*y),
            ArithOp::Div => None,
        };
        return result.map_or(Value::Null, Value::Integer);
    }
    let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
        return Value::Null;
    };
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => {
            if y == 0.0 {
                return Value::Null;
            }
            x / y
        }
    };
    if result.is_finite() {
        Value::Float(result)
    } else {
        Value::Null
    }
}

fn round(value: &Value, digits: i32) -> Value {
    let Some(x) = value.as_f64() else {
        return Value::Null;
    };
    let factor = 10f64.powi(digits);
    let rounded = (x * factor).round() / factor;
    if rounded.is_finite() {
        Value::Float(rounded)
    } else {
        Value::Float(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn people() -> (Bindings, Vec<Vec<Value>>) {
        let schema = Schema::new(vec![
            Column::new("name", DataType::String),
            Column::new("age", DataType::Integer),
            Column::new("score", DataType::Float),
        ])
        .unwrap();
        let rows = vec![
            vec![Value::from("ada"), Value::Integer(36), Value::Float(9.5)],
            vec![Value::from("bo"), Value::Null, Value::Float(4.0)],
        ];
        (Bindings::from_schema(&schema, Some("people")), rows)
    }

    fn parse(json: &str) -> Expr {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn expressions_parse_from_json() {
        let expr = parse(r#"{"round": {"expr": {"div": [{"col": "age"}, {"lit": 3}]}, "digits": 1}}"#);
        let (bindings, rows) = people();
        let bound = expr.bind(&bindings).unwrap();
        assert_eq!(bound.data_type(), DataType::Float);
        assert_eq!(bound.eval(&rows[0]), Value::Float(12.0));
    }

    #[test]
    fn arithmetic_propagates_null() {
        let (bindings, rows) = people();
        let bound = parse(r#"{"add": [{"col": "age"}, {"lit": 1}]}"#)
            .bind(&bindings)
            .unwrap();
        assert_eq!(bound.eval(&rows[0]), Value::Integer(37));
        assert_eq!(bound.eval(&rows[1]), Value::Null);
    }

    #[test]
    fn division_by_zero_is_null() {
        let (bindings, rows) = people();
        let bound = parse(r#"{"div": [{"col": "score"}, {"lit": 0}]}"#)
            .bind(&bindings)
            .unwrap();
        assert_eq!(bound.eval(&rows[0]), Value::Null);
    }

    #[test]
    fn arithmetic_on_strings_is_rejected() {
        let (bindings, _) = people();
        let err = parse(r#"{"mul": [{"col": "name"}, {"lit": 2}]}"#)
            .bind(&bindings)
            .unwrap_err();
        assert!(matches!(err, QueryError::TypeMismatch { .. }));
    }

    #[test]
    fn qualified_and_bare_columns_resolve() {
        let (bindings, _) = people();
        assert_eq!(bindings.resolve("people.age").unwrap(), 1);
        assert_eq!(bindings.resolve("age").unwrap(), 1);
        assert!(matches!(
            bindings.resolve("height"),
            Err(QueryError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn duplicate_bare_names_are_ambiguous() {
        let (left, _) = people();
        let (right, _) = people();
        let mut right = right;
        for b in &mut right.columns {
            b.qualifier = Some("other".into());
        }
        let joined = left.concat(right);
        assert!(matches!(
            joined.resolve("age"),
            Err(QueryError::AmbiguousColumn { .. })
        ));
        assert_eq!(joined.resolve("other.age").unwrap(), 4);
    }

    #[test]
    fn comparisons_with_null_are_unknown() {
        let (bindings, rows) = people();
        let pred: Predicate = serde_json::from_str(r#"{"ge": [{"col": "age"}, {"lit": 18}]}"#).unwrap();
        let bound = pred.bind(&bindings).unwrap();
        assert_eq!(bound.eval(&rows[0]), Some(true));
        assert_eq!(bound.eval(&rows[1]), None);

        let negated = Predicate::Not(Box::new(pred)).bind(&bindings).unwrap();
        assert!(!negated.matches(&rows[1]));
    }

    #[test]
    fn kleene_logic_for_and_or() {
        let (bindings, rows) = people();
        let unknown = Predicate::Gt(Expr::col("age"), Expr::lit(1));
        let truth = Predicate::IsNotNull(Expr::col("name"));
        let or = Predicate::Or(vec![unknown.clone(), truth.clone()])
            .bind(&bindings)
            .unwrap();
        let and = Predicate::And(vec![unknown, truth]).bind(&bindings).unwrap();
        assert_eq!(or.eval(&rows[1]), Some(true));
        assert_eq!(and.eval(&rows[1]), None);
    }

    #[test]
    fn in_list_and_case() {
        let (bindings, rows) = people();
        let in_pred = Predicate::In {
            expr: Expr::col("name"),
            values: vec!["bo".into(), "cy".into()],
        }
        .bind(&bindings)
        .unwrap();
        assert_eq!(in_pred.eval(&rows[0]), Some(false));
        assert_eq!(in_pred.eval(&rows[1]), Some(true));

        let case = parse(
            r#"{"case": {"when": [{"if": {"ge": [{"col": "age"}, {"lit": 30}]}, "then": {"lit": "senior"}}], "else": {"lit": "other"}}}"#,
        )
        .bind(&bindings)
        .unwrap();
        assert_eq!(case.eval(&rows[0]), Value::from("senior"));
        assert_eq!(case.eval(&rows[1]), Value::from("other"));
    }

    #[test]
    fn coalesce_widens_to_common_type() {
        let (bindings, rows) = people();
        let bound = parse(r#"{"coalesce": [{"col": "age"}, {"col": "score"}]}"#)
            .bind(&bindings)
            .unwrap();
        assert_eq!(bound.data_type(), DataType::Float);
        assert_eq!(bound.eval(&rows[0]), Value::Float(36.0));
        assert_eq!(bound.eval(&rows[1]), Value::Float(4.0));
    }

    #[test]
    fn qualifiers_are_collected() {
        let pred = Predicate::Eq(Expr::col("people.region_id"), Expr::col("regions.region_id"));
        let mut out = Vec::new();
        pred.collect_qualifiers(&mut out);
        assert_eq!(out, vec!["people", "regions"]);
    }
}
