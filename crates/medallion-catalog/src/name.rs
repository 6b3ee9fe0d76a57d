//! Namespace and table names.
//!
//! Names are path segments in storage, so they are restricted to lowercase
//! ASCII letters, digits and underscores, starting with a letter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};

const MAX_NAME_LEN: usize = 128;

/// Validates a namespace, table or column name.
///
/// # Errors
///
/// Returns [`CatalogError::InvalidName`] describing the first violation.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| CatalogError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("cannot be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("longer than 128 characters"));
    }
    if !name.chars().next().is_some_and(|c| c.is_ascii_lowercase()) {
        return Err(invalid("must start with a lowercase letter"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        return Err(invalid("only a-z, 0-9 and _ are allowed"));
    }
    Ok(())
}

/// A namespace-qualified table name, written `namespace.table`.
///
/// ```rust
/// use medallion_catalog::name::TableRef;
///
/// let table: TableRef = "gold.mart_regional_analytics".parse().unwrap();
/// assert_eq!(table.namespace(), "gold");
/// assert_eq!(table.name(), "mart_regional_analytics");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableRef {
    namespace: String,
    name: String,
}

impl TableRef {
    /// Creates a validated table reference.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidName`] if either part is malformed.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let name = name.into();
        validate_name(&namespace)?;
        validate_name(&name)?;
        Ok(Self { namespace, name })
    }

    /// Returns the namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Returns the table name within its namespace.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

impl FromStr for TableRef {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        let Some((namespace, name)) = s.split_once('.') else {
            return Err(CatalogError::InvalidName {
                name: s.to_string(),
                reason: "expected namespace.table".into(),
            });
        };
        Self::new(namespace, name)
    }
}

impl TryFrom<String> for TableRef {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TableRef> for String {
    fn from(value: TableRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_layer_names() {
        for name in ["bronze", "silver", "gold", "sqlmesh__analytics", "stg_people2"] {
            validate_name(name).unwrap();
        }
    }

    #[test]
    fn rejects_malformed_names() {
        for name in ["", "Gold", "1st", "has-dash", "has.dot", "a/b"] {
            assert!(validate_name(name).is_err(), "{name} should be rejected");
        }
        assert!(validate_name(&"a".repeat(129)).is_err());
    }

    #[test]
    fn table_ref_parses_and_displays() {
        let table: TableRef = "bronze.people".parse().unwrap();
        assert_eq!(table.to_string(), "bronze.people");
        assert!("people".parse::<TableRef>().is_err());
        assert!("bronze.a.b".parse::<TableRef>().is_err());
    }

    #[test]
    fn table_ref_serializes_as_string() {
        let table = TableRef::new("silver", "stg_regions").unwrap();
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, "\"silver.stg_regions\"");
        let back: TableRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
        assert!(serde_json::from_str::<TableRef>("\"nodot\"").is_err());
    }
}
