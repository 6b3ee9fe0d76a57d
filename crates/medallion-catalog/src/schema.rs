//! Ordered table schemas and the rules for evolving them.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::value::{DataType, Value};

/// A row of values, positionally aligned with a [`Schema`].
pub type Row = Vec<Value>;

/// One named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Column type.
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl Column {
    /// Creates a column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Ordered list of uniquely named columns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Column>", into = "Vec<Column>")]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    /// Creates a schema, rejecting empty or duplicate column names.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidName`] for an empty or repeated name.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.name.trim().is_empty() {
                return Err(CatalogError::InvalidName {
                    name: column.name.clone(),
                    reason: "column name cannot be empty".into(),
                });
            }
            if !seen.insert(column.name.as_str()) {
                return Err(CatalogError::InvalidName {
                    name: column.name.clone(),
                    reason: "duplicate column name".into(),
                });
            }
        }
        Ok(Self { columns })
    }

    /// Returns the columns in order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the schema has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Returns the position of a column.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Returns the column names in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Returns whether `next` only adds columns to `self`.
    ///
    /// Every existing column must survive with the same type. Order of the
    /// surviving columns may change; new columns may appear anywhere.
    #[must_use]
    pub fn is_additive_extension(&self, next: &Self) -> bool {
        self.columns
            .iter()
            .all(|c| next.column(&c.name).is_some_and(|n| n.data_type == c.data_type))
    }

    /// Describes why `next` is not an additive extension of `self`.
    #[must_use]
    pub fn incompatibility(&self, next: &Self) -> Option<String> {
        for column in &self.columns {
            match next.column(&column.name) {
                None => return Some(format!("column {} would be dropped", column.name)),
                Some(n) if n.data_type != column.data_type => {
                    return Some(format!(
                        "column {} would change type from {} to {}",
                        column.name, column.data_type, n.data_type
                    ));
                }
                Some(_) => {}
            }
        }
        None
    }

    /// Builds a row adapter that maps rows of `self` onto `target`.
    ///
    /// Columns are matched by name; every target column must exist in
    /// `self` and every source column must appear in `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::SchemaConflict`] naming the unmatched column.
    pub fn projection_onto(&self, target: &Self, table: &str) -> Result<RowAdapter> {
        if let Some(extra) = self.columns.iter().find(|c| target.column(&c.name).is_none()) {
            return Err(CatalogError::SchemaConflict {
                table: table.to_string(),
                message: format!("source column {} is not declared", extra.name),
            });
        }
        let mut mapping = Vec::with_capacity(target.len());
        for column in &target.columns {
            let Some(idx) = self.index_of(&column.name) else {
                return Err(CatalogError::SchemaConflict {
                    table: table.to_string(),
                    message: format!("declared column {} is missing from the source", column.name),
                });
            };
            mapping.push((idx, column.clone()));
        }
        Ok(RowAdapter { mapping })
    }
}

impl TryFrom<Vec<Column>> for Schema {
    type Error = CatalogError;

    fn try_from(columns: Vec<Column>) -> Result<Self> {
        Self::new(columns)
    }
}

impl From<Schema> for Vec<Column> {
    fn from(schema: Schema) -> Self {
        schema.columns
    }
}

/// Reorders and coerces rows from one schema into another.
#[derive(Debug, Clone)]
pub struct RowAdapter {
    mapping: Vec<(usize, Column)>,
}

impl RowAdapter {
    /// Adapts one row.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::TypeMismatch`] if a value cannot be coerced.
    pub fn adapt(&self, mut row: Row) -> Result<Row> {
        self.mapping
            .iter()
            .map(|(idx, column)| {
                let value = row.get_mut(*idx).map(std::mem::take).unwrap_or(Value::Null);
                value.coerce_to(column.data_type, &column.name)
            })
            .collect()
    }
}
