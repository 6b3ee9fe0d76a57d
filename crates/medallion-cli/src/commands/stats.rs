//! Stats command - row counts, distinct counts and aggregates.

use anyhow::{Context, Result, anyhow};
use clap::Args;

use medallion_catalog::aggregate::{AggregateFunc, AggregateSpec};
use medallion_catalog::expr::Predicate;
use medallion_catalog::TableRef;

use crate::commands::show::parse_filter;
use crate::output::{print_json, render_plain, render_rows};
use crate::{Config, OutputFormat};

/// Arguments for the stats command.
#[derive(Debug, Args)]
pub struct StatsArgs {
    /// Table to summarize, as `namespace.table`.
    #[arg()]
    pub table: String,

    /// Count distinct non-null values of these columns.
    #[arg(long, value_delimiter = ',')]
    pub distinct: Vec<String>,

    /// Group the aggregates by these columns.
    #[arg(long = "group-by", short = 'g', value_delimiter = ',')]
    pub group_by: Vec<String>,

    /// Aggregate `func:column` (count, countDistinct, sum, avg, min, max)
    /// or `countRows`; repeatable.
    #[arg(long = "agg", short = 'a')]
    pub aggregates: Vec<String>,

    /// Equality filter `column=value` applied before aggregating.
    #[arg(long = "where", short = 'w')]
    pub filters: Vec<String>,
}

/// Parses `func:column` or `countRows` into a named aggregate.
///
/// The output column is named `func_column`, or `rows` for `countRows`.
///
/// # Errors
///
/// Returns an error for an unknown function or a missing column.
pub fn parse_aggregate(text: &str) -> Result<AggregateSpec> {
    let (func_name, column) = match text.split_once(':') {
        Some((f, c)) => (f.trim(), Some(c.trim())),
        None => (text.trim(), None),
    };
    let func = AggregateFunc::parse(func_name)
        .ok_or_else(|| anyhow!("unknown aggregate function {func_name}"))?;
    match (func, column) {
        (AggregateFunc::CountRows, _) => Ok(AggregateSpec::count_rows("rows")),
        (_, Some(column)) if !column.is_empty() => Ok(AggregateSpec::over(
            format!("{}_{column}", func_name.to_ascii_lowercase()),
            func,
            column,
        )),
        _ => Err(anyhow!("aggregate {func_name} needs a column, e.g. {func_name}:age")),
    }
}

/// Execute the stats command.
///
/// # Errors
///
/// Returns an error if the table does not exist or an argument is invalid.
pub async fn execute(args: StatsArgs, config: &Config) -> Result<()> {
    let table: TableRef = args.table.parse()?;
    let store = config.open_store().await?;
    let handle = store
        .read_snapshot(&table)
        .await
        .with_context(|| format!("cannot read {table}"))?;

    let filters = args
        .filters
        .iter()
        .map(|f| parse_filter(f, handle.schema()))
        .collect::<Result<Vec<_>>>()?;
    let filter = match filters.len() {
        0 => None,
        1 => filters.into_iter().next(),
        _ => Some(Predicate::And(filters)),
    };

    let distinct = args
        .distinct
        .iter()
        .map(|c| Ok((c.clone(), handle.distinct_count(c)?)))
        .collect::<Result<Vec<(String, usize)>>>()?;

    let mut aggregates = args
        .aggregates
        .iter()
        .map(|a| parse_aggregate(a))
        .collect::<Result<Vec<_>>>()?;
    if aggregates.is_empty() && (!args.group_by.is_empty() || filter.is_some()) {
        aggregates.push(AggregateSpec::count_rows("rows"));
    }
    let grouped = if aggregates.is_empty() {
        None
    } else {
        Some(handle.aggregate(filter.as_ref(), &args.group_by, &aggregates)?)
    };

    match config.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "table": table.to_string(),
            "version": handle.version(),
            "rowCount": handle.row_count(),
            "distinct": distinct
                .iter()
                .map(|(column, count)| (column.clone(), serde_json::json!(count)))
                .collect::<serde_json::Map<_, _>>(),
            "aggregates": grouped.as_ref().map(|g| g.to_json_rows()),
        }))?,
        OutputFormat::Text | OutputFormat::Table => {
            println!("{table} v{}: {} rows", handle.version(), handle.row_count());
            for (column, count) in &distinct {
                println!("  distinct {column}: {count}");
            }
            if let Some(grouped) = grouped {
                println!();
                if config.format == OutputFormat::Table {
                    println!("{}", render_rows(&grouped.schema, &grouped.rows));
                } else {
                    println!("{}", render_plain(&grouped.schema, &grouped.rows));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_parse_with_generated_names() {
        let avg = parse_aggregate("avg:age").unwrap();
        assert_eq!(avg.name, "avg_age");
        assert_eq!(avg.func, AggregateFunc::Avg);

        let distinct = parse_aggregate("countDistinct:current_faction").unwrap();
        assert_eq!(distinct.name, "countdistinct_current_faction");

        assert_eq!(parse_aggregate("countRows").unwrap(), AggregateSpec::count_rows("rows"));
    }

    #[test]
    fn aggregates_need_a_known_function_and_column() {
        assert!(parse_aggregate("median:age").is_err());
        assert!(parse_aggregate("sum").is_err());
        assert!(parse_aggregate("sum:").is_err());
    }
}
