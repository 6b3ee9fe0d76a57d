//! Show command - print a table's schema and rows.

use anyhow::{Context, Result, anyhow};
use clap::Args;

use medallion_catalog::expr::{Expr, Predicate};
use medallion_catalog::reader::{OrderKey, SnapshotQuery};
use medallion_catalog::schema::Schema;
use medallion_catalog::value::Value;
use medallion_catalog::TableRef;

use crate::output::{print_json, render_plain, render_rows};
use crate::{Config, OutputFormat};

/// Arguments for the show command.
#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Table to show, as `namespace.table`.
    #[arg()]
    pub table: String,

    /// Equality filter `column=value`; repeat to combine with AND. An empty
    /// value matches NULL.
    #[arg(long = "where", short = 'w')]
    pub filters: Vec<String>,

    /// Sort key `column` or `column:desc`; repeatable.
    #[arg(long = "order-by", short = 'o')]
    pub order_by: Vec<String>,

    /// Maximum rows to print.
    #[arg(long, short = 'n', default_value = "20")]
    pub limit: usize,

    /// Columns to print, comma-separated.
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,
}

impl ShowArgs {
    /// Builds the read query against `schema`.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed filter or sort key, or a filter
    /// value that does not parse as its column's type.
    pub fn query(&self, schema: &Schema) -> Result<SnapshotQuery> {
        let mut query = SnapshotQuery::new().limit(self.limit);
        for filter in &self.filters {
            query = query.filter(parse_filter(filter, schema)?);
        }
        for key in &self.order_by {
            query = query.order_by(OrderKey::parse(key)?);
        }
        if !self.columns.is_empty() {
            query = query.columns(self.columns.iter().map(|c| c.trim()));
        }
        Ok(query)
    }
}

/// Parses `column=value` into a typed equality predicate.
///
/// # Errors
///
/// Returns an error if there is no `=`, the column is unknown, or the value
/// does not parse as the column's type.
pub fn parse_filter(text: &str, schema: &Schema) -> Result<Predicate> {
    let (column, raw) = text
        .split_once('=')
        .ok_or_else(|| anyhow!("filter must look like column=value (got {text})"))?;
    let column = column.trim();
    let data_type = schema
        .column(column)
        .map(|c| c.data_type)
        .ok_or_else(|| anyhow!("unknown column {column}"))?;
    let value = Value::parse_as(raw, data_type, column)?;
    Ok(if value.is_null() {
        Predicate::IsNull(Expr::col(column))
    } else {
        Predicate::column_eq(column, value.to_json())
    })
}

/// Execute the show command.
///
/// # Errors
///
/// Returns an error if the table does not exist or the query is invalid.
pub async fn execute(args: ShowArgs, config: &Config) -> Result<()> {
    let table: TableRef = args.table.parse()?;
    let store = config.open_store().await?;
    let handle = store
        .read_snapshot(&table)
        .await
        .with_context(|| format!("cannot read {table}"))?;
    let result = handle.query(&args.query(handle.schema())?)?;

    match config.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "table": table.to_string(),
            "version": handle.version(),
            "schemaVersion": handle.schema_version(),
            "rowCount": handle.row_count(),
            "schema": handle.schema(),
            "rows": result.to_json_rows(),
        }))?,
        OutputFormat::Text => {
            println!(
                "{table} v{} (schema v{}, {} rows, committed {})",
                handle.version(),
                handle.schema_version(),
                handle.row_count(),
                handle.committed_at().format("%Y-%m-%d %H:%M:%S")
            );
            for column in handle.schema().columns() {
                println!("  {}: {}", column.name, column.data_type);
            }
            println!();
            println!("{}", render_plain(&result.schema, &result.rows));
        }
        OutputFormat::Table => {
            println!("{}", render_rows(&result.schema, &result.rows));
        }
    }
    Ok(())
}
