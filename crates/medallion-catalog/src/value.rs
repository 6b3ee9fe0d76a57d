//! Typed cell values and their coercion rules.
//!
//! [`Value`] has a total order so that rows can be sorted and used as
//! grouping keys: `Null` sorts first, numbers compare numerically across
//! `Integer` and `Float` (ties broken by type), and floats use
//! [`f64::total_cmp`]. Equality and hashing of floats go by bit pattern, which
//! keeps `Eq`, `Ord` and `Hash` consistent.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `true` / `false`.
    Boolean,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Float,
    /// UTF-8 text.
    String,
    /// Calendar date, ISO `YYYY-MM-DD`.
    Date,
}

impl DataType {
    /// Returns true for `Integer` and `Float`.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    /// Returns whether values of `self` can be stored in a column of `target`.
    #[must_use]
    pub fn widens_to(self, target: Self) -> bool {
        self == target || (self == Self::Integer && target == Self::Float)
    }

    /// The narrowest type holding values of both `self` and `other`.
    #[must_use]
    pub fn unify(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Integer, Self::Float) | (Self::Float, Self::Integer) => Self::Float,
            _ => Self::String,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Date => "date",
        };
        f.write_str(name)
    }
}

/// One cell of a row.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Missing value.
    #[default]
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Float(f64),
    /// Text value.
    String(String),
    /// Date value.
    Date(NaiveDate),
}

impl Value {
    /// Returns true for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the value's type, or `None` for `Null`.
    #[must_use]
    pub const fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Boolean(_) => Some(DataType::Boolean),
            Self::Integer(_) => Some(DataType::Integer),
            Self::Float(_) => Some(DataType::Float),
            Self::String(_) => Some(DataType::String),
            Self::Date(_) => Some(DataType::Date),
        }
    }

    /// Returns the value as a float if it is numeric.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Parses raw extract text into `data_type`.
    ///
    /// Empty or whitespace-only text becomes `Null`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::TypeMismatch`] if the text does not parse.
    pub fn parse_as(raw: &str, data_type: DataType, column: &str) -> Result<Self> {
        let text = raw.trim();
        if text.is_empty() {
            return Ok(Self::Null);
        }
        let mismatch = || CatalogError::TypeMismatch {
            column: column.to_string(),
            value: raw.to_string(),
            expected: data_type.to_string(),
        };
        match data_type {
            DataType::Boolean => parse_bool(text).map(Self::Boolean).ok_or_else(mismatch),
            DataType::Integer => text.parse().map(Self::Integer).map_err(|_| mismatch()),
            DataType::Float => text.parse().map(Self::Float).map_err(|_| mismatch()),
            DataType::String => Ok(Self::String(raw.to_string())),
            DataType::Date => NaiveDate::parse_from_str(text, DATE_FORMAT)
                .map(Self::Date)
                .map_err(|_| mismatch()),
        }
    }

    /// Coerces the value into a column of `data_type`.
    ///
    /// Integers widen to floats, strings are parsed, and every other
    /// combination is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::TypeMismatch`] for incompatible values.
    #[allow(clippy::cast_precision_loss)]
    pub fn coerce_to(self, data_type: DataType, column: &str) -> Result<Self> {
        match (self, data_type) {
            (Self::Null, _) => Ok(Self::Null),
            (Self::String(s), target) => Self::parse_as(&s, target, column),
            (Self::Integer(i), DataType::Float) => Ok(Self::Float(i as f64)),
            (value, target) if value.data_type() == Some(target) => Ok(value),
            (value, target) => Err(CatalogError::TypeMismatch {
                column: column.to_string(),
                value: value.to_string(),
                expected: target.to_string(),
            }),
        }
    }

    /// Renders the value as JSON for snapshot files and reports.
    ///
    /// Non-finite floats have no JSON form and become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Boolean(b) => serde_json::Value::Bool(*b),
            Self::Integer(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Date(d) => serde_json::Value::String(d.format(DATE_FORMAT).to_string()),
        }
    }

    /// Reads a JSON cell written by [`to_json`](Self::to_json) back as `data_type`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::TypeMismatch`] if the cell does not fit the type.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_json(json: &serde_json::Value, data_type: DataType, column: &str) -> Result<Self> {
        let mismatch = || CatalogError::TypeMismatch {
            column: column.to_string(),
            value: json.to_string(),
            expected: data_type.to_string(),
        };
        match (json, data_type) {
            (serde_json::Value::Null, _) => Ok(Self::Null),
            (serde_json::Value::Bool(b), DataType::Boolean) => Ok(Self::Boolean(*b)),
            (serde_json::Value::Number(n), DataType::Integer) => {
                n.as_i64().map(Self::Integer).ok_or_else(mismatch)
            }
            (serde_json::Value::Number(n), DataType::Float) => {
                n.as_f64().map(Self::Float).ok_or_else(mismatch)
            }
            (serde_json::Value::String(s), DataType::String) => Ok(Self::String(s.clone())),
            (serde_json::Value::String(s), DataType::Date) => {
                NaiveDate::parse_from_str(s, DATE_FORMAT)
                    .map(Self::Date)
                    .map_err(|_| mismatch())
            }
            _ => Err(mismatch()),
        }
    }

    /// Converts a JSON literal into a value, inferring its type.
    #[must_use]
    pub fn from_literal(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Null | serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Self::Null
            }
        }
    }

    /// Compares two values for predicates, or `None` if either is `Null`.
    ///
    /// Strings compared with dates are parsed as dates first.
    #[must_use]
    pub fn sql_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, _) | (_, Self::Null) => None,
            (Self::Date(d), Self::String(s)) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .ok()
                .map(|o| d.cmp(&o)),
            (Self::String(s), Self::Date(d)) => NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
                .ok()
                .map(|o| o.cmp(d)),
            (a, b) => Some(a.cmp(b)),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Float(_) => 2,
            Self::String(_) => 3,
            Self::Date(_) => 4,
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Integer(a), Self::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float(a), Self::Integer(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Boolean(b) => b.hash(state),
            Self::Integer(i) => i.hash(state),
            Self::Float(f) => f.to_bits().hash(state),
            Self::String(s) => s.hash(state),
            Self::Date(d) => d.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Date(d) => write!(f, "{}", d.format(DATE_FORMAT)),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_text_is_null_for_every_type() {
        for ty in [
            DataType::Boolean,
            DataType::Integer,
            DataType::Float,
            DataType::String,
            DataType::Date,
        ] {
            assert!(Value::parse_as("  ", ty, "c").unwrap().is_null());
        }
    }

    #[test]
    fn integers_widen_to_float_but_not_back() {
        assert_eq!(
            Value::Integer(3).coerce_to(DataType::Float, "x").unwrap(),
            Value::Float(3.0)
        );
        let err = Value::Float(3.5).coerce_to(DataType::Integer, "x").unwrap_err();
        assert!(matches!(err, CatalogError::TypeMismatch { ref column, .. } if column == "x"));
    }

    #[test]
    fn strings_parse_into_target_types() {
        assert_eq!(
            Value::from("2024-03-01").coerce_to(DataType::Date, "d").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(
            Value::from("Yes").coerce_to(DataType::Boolean, "b").unwrap(),
            Value::Boolean(true)
        );
        assert!(Value::from("abc").coerce_to(DataType::Integer, "n").is_err());
    }

    #[test]
    fn nulls_sort_first_and_numbers_mix() {
        let mut values = vec![
            Value::from("b"),
            Value::Float(1.5),
            Value::Null,
            Value::Integer(2),
            Value::Integer(1),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Integer(1),
                Value::Float(1.5),
                Value::Integer(2),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn integer_and_equal_float_are_distinct_keys() {
        assert_ne!(Value::Integer(1), Value::Float(1.0));
        assert_eq!(
            Value::Integer(1).sql_cmp(&Value::Float(1.0)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn sql_cmp_with_null_is_unknown() {
        assert_eq!(Value::Null.sql_cmp(&Value::Integer(1)), None);
        let date = Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(date.sql_cmp(&Value::from("2021-01-01")), Some(Ordering::Less));
    }

    #[test]
    fn json_roundtrip_keeps_types() {
        let cases = [
            (Value::Integer(-7), DataType::Integer),
            (Value::Float(2.5), DataType::Float),
            (Value::Boolean(false), DataType::Boolean),
            (Value::from("x"), DataType::String),
            (
                Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap()),
                DataType::Date,
            ),
            (Value::Null, DataType::Date),
        ];
        for (value, ty) in cases {
            let back = Value::from_json(&value.to_json(), ty, "c").unwrap();
            assert_eq!(back, value);
        }
    }

    fn any_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Boolean),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>().prop_map(Value::Float),
            "[a-z]{0,4}".prop_map(Value::String),
        ]
    }

    proptest! {
        #[test]
        fn ordering_is_antisymmetric(a in any_value(), b in any_value()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
            prop_assert_eq!(a == b, a.cmp(&b) == Ordering::Equal);
        }

        #[test]
        fn ordering_is_transitive(a in any_value(), b in any_value(), c in any_value()) {
            let mut sorted = [a, b, c];
            sorted.sort();
            prop_assert!(sorted[0] <= sorted[1]);
            prop_assert!(sorted[1] <= sorted[2]);
            prop_assert!(sorted[0] <= sorted[2]);
        }
    }
}
