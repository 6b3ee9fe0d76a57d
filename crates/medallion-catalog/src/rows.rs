//! Row providers: the lazy sources a snapshot is materialized from.
//!
//! A provider is opened at most once, and only when the store actually needs
//! its rows. `create_table_if_absent` never opens the provider of a table
//! that already exists.

use crate::error::Result;
use crate::schema::{Row, Schema};

/// Boxed single-pass row iterator.
pub type RowIter = Box<dyn Iterator<Item = Result<Row>> + Send>;

/// An opened provider: its schema and a single pass over its rows.
pub struct RowStream {
    schema: Schema,
    rows: RowIter,
}

impl RowStream {
    /// Creates a stream from a schema and a row iterator.
    #[must_use]
    pub fn new(schema: Schema, rows: RowIter) -> Self {
        Self { schema, rows }
    }

    /// Returns the schema of the rows.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Splits the stream into schema and rows.
    #[must_use]
    pub fn into_parts(self) -> (Schema, RowIter) {
        (self.schema, self.rows)
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// A source of rows for one snapshot.
pub trait RowsProvider: Send {
    /// Human-readable description of the source, used in logs.
    fn describe(&self) -> String;

    /// Opens the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or is malformed.
    fn open(self: Box<Self>) -> Result<RowStream>;
}

/// A provider over rows already held in memory.
#[derive(Debug, Clone)]
pub struct MemoryRows {
    schema: Schema,
    rows: Vec<Row>,
}

impl MemoryRows {
    /// Creates an in-memory provider.
    #[must_use]
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    /// Boxes the provider for the store's API.
    #[must_use]
    pub fn boxed(self) -> Box<dyn RowsProvider> {
        Box::new(self)
    }
}

impl RowsProvider for MemoryRows {
    fn describe(&self) -> String {
        format!("{} in-memory rows", self.rows.len())
    }

    fn open(self: Box<Self>) -> Result<RowStream> {
        let Self { schema, rows } = *self;
        Ok(RowStream::new(schema, Box::new(rows.into_iter().map(Ok))))
    }
}
