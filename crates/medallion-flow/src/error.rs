//! Error types for rule sets, refresh cycles and pipelines.

use std::path::PathBuf;

use medallion_catalog::CatalogError;

/// The result type used throughout medallion-flow.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors that can occur while building or running a refresh.
///
/// Graph-structure errors are raised before any table is written.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The dependency graph contains a cycle.
    #[error("cyclic dependency between tables: {}", .tables.join(", "))]
    CyclicDependency {
        /// Tables on or behind the cycle, in declaration order.
        tables: Vec<String>,
    },

    /// Two rules produce the same table.
    #[error("table {table} is produced by both {first} and {second}")]
    DuplicateProducer {
        /// The contested table.
        table: String,
        /// Rule declared first.
        first: String,
        /// Rule declared second.
        second: String,
    },

    /// Two rules share a name.
    #[error("duplicate rule name: {name}")]
    DuplicateRule {
        /// The repeated name.
        name: String,
    },

    /// A rule queries a table it does not declare as an input.
    #[error("rule {rule} reads {table} without declaring it as an input")]
    UndeclaredInput {
        /// Rule name.
        rule: String,
        /// The undeclared table.
        table: String,
    },

    /// A rule declares an input its query never reads.
    #[error("rule {rule} declares input {table} but never reads it")]
    UnusedInput {
        /// Rule name.
        rule: String,
        /// The unused input.
        table: String,
    },

    /// A rule is structurally invalid.
    #[error("invalid rule {rule}: {message}")]
    InvalidRule {
        /// Rule name.
        rule: String,
        /// What is wrong with it.
        message: String,
    },

    /// A rule targets a namespace that has not been created.
    #[error("rule {rule} targets missing namespace {namespace}")]
    NamespaceNotFound {
        /// Rule name.
        rule: String,
        /// The missing namespace.
        namespace: String,
    },

    /// A rule's query failed against its inputs.
    #[error("rule {rule} failed: {message}")]
    RuleEvaluation {
        /// Rule name.
        rule: String,
        /// What went wrong.
        message: String,
    },

    /// A DAG node index was not found.
    #[error("DAG node not found: {node}")]
    DagNodeNotFound {
        /// The node identifier.
        node: String,
    },

    /// A pipeline definition could not be read or parsed.
    #[error("invalid pipeline definition {}: {message}", .path.display())]
    Definition {
        /// Definition file.
        path: PathBuf,
        /// What is wrong with it.
        message: String,
    },

    /// A rule definition could not be serialized for hashing.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// A catalog operation failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl FlowError {
    /// Short machine-readable kind, used in reports and metrics labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CyclicDependency { .. } => "cyclic_dependency",
            Self::DuplicateProducer { .. } => "duplicate_producer",
            Self::DuplicateRule { .. } => "duplicate_rule",
            Self::UndeclaredInput { .. } => "undeclared_input",
            Self::UnusedInput { .. } => "unused_input",
            Self::InvalidRule { .. } => "invalid_rule",
            Self::NamespaceNotFound { .. } => "namespace_not_found",
            Self::RuleEvaluation { .. } => "rule_evaluation",
            Self::DagNodeNotFound { .. } => "internal",
            Self::Definition { .. } => "definition",
            Self::Serialization { .. } => "serialization",
            Self::Catalog(e) => e.kind(),
        }
    }

    /// Whether this error concerns the shape of the rule set rather than
    /// one table's data.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::CyclicDependency { .. }
                | Self::DuplicateProducer { .. }
                | Self::DuplicateRule { .. }
                | Self::UndeclaredInput { .. }
                | Self::UnusedInput { .. }
                | Self::InvalidRule { .. }
                | Self::NamespaceNotFound { .. }
        )
    }

    pub(crate) fn evaluation(rule: &str, message: impl std::fmt::Display) -> Self {
        Self::RuleEvaluation {
            rule: rule.to_string(),
            message: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_tables() {
        let err = FlowError::CyclicDependency {
            tables: vec!["silver.a".into(), "gold.b".into()],
        };
        assert_eq!(
            err.to_string(),
            "cyclic dependency between tables: silver.a, gold.b"
        );
        assert!(err.is_structural());
    }

    #[test]
    fn catalog_errors_keep_their_kind() {
        let err = FlowError::from(CatalogError::TableNotFound {
            table: "bronze.people".into(),
        });
        assert_eq!(err.kind(), "table_not_found");
        assert!(!err.is_structural());
    }
}
