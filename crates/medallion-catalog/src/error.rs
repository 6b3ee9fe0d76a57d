//! Error types for catalog operations.

use thiserror::Error;

use crate::expr::QueryError;

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Boxed error raised by a rows provider.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The namespace has not been created.
    #[error("namespace not found: {namespace}")]
    NamespaceNotFound {
        /// The missing namespace.
        namespace: String,
    },

    /// The table has no committed snapshot.
    #[error("table not found: {table}")]
    TableNotFound {
        /// Qualified name of the missing table.
        table: String,
    },

    /// The incoming schema is incompatible with the table's schema.
    #[error("schema conflict on {table}: {message}")]
    SchemaConflict {
        /// Qualified table name.
        table: String,
        /// What made the schemas incompatible.
        message: String,
    },

    /// The commit lost every attempt against concurrent writers.
    #[error("concurrent write conflict on {table}: {message}")]
    ConcurrentWriteConflict {
        /// Qualified table name.
        table: String,
        /// Description of the lost race.
        message: String,
    },

    /// A value could not be coerced into its column type.
    #[error("type mismatch in column {column}: cannot read {value:?} as {expected}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// The offending raw value.
        value: String,
        /// The column's declared type.
        expected: String,
    },

    /// A namespace, table or column name is malformed.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The rows provider failed while producing rows.
    #[error("rows provider {origin} failed: {source}")]
    Provider {
        /// Description of the provider, such as its source file.
        origin: String,
        /// The provider's error.
        #[source]
        source: BoxError,
    },

    /// A query or expression could not be evaluated.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// The store has been closed.
    #[error("catalog store is closed")]
    Closed,

    /// A lower-level storage or coordination failure.
    #[error(transparent)]
    Core(#[from] medallion_core::Error),
}

impl CatalogError {
    /// Creates a provider error.
    #[must_use]
    pub fn provider(origin: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Provider {
            origin: origin.into(),
            source: source.into(),
        }
    }

    /// Returns the provider's own error, if this is a provider failure.
    #[must_use]
    pub fn provider_source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Provider { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }

    /// Short machine-readable kind, used in reports and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NamespaceNotFound { .. } => "namespace_not_found",
            Self::TableNotFound { .. } => "table_not_found",
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::ConcurrentWriteConflict { .. } => "concurrent_write_conflict",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::InvalidName { .. } => "invalid_name",
            Self::Provider { .. } => "provider",
            Self::Query(_) => "query",
            Self::Closed => "closed",
            Self::Core(_) => "storage",
        }
    }
}
