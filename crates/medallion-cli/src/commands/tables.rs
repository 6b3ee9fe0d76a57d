//! Tables command - list namespaces and their tables.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::{Table, Tabled};

use crate::output::print_json;
use crate::{Config, OutputFormat};

/// Arguments for the tables command.
#[derive(Debug, Args)]
pub struct TablesArgs {
    /// Only list this namespace.
    #[arg()]
    pub namespace: Option<String>,
}

/// One listed table.
#[derive(Debug, Clone, Serialize, Tabled)]
#[serde(rename_all = "camelCase")]
pub struct TableListing {
    /// `namespace.table`.
    #[tabled(rename = "Table")]
    pub table: String,
    /// Current version.
    #[tabled(rename = "Version")]
    pub version: u64,
    /// Schema version.
    #[tabled(rename = "Schema")]
    pub schema_version: u32,
    /// Rows in the current snapshot.
    #[tabled(rename = "Rows")]
    pub row_count: u64,
    /// When the current version was committed.
    #[tabled(rename = "Committed")]
    pub committed_at: String,
}

/// Execute the tables command.
///
/// # Errors
///
/// Returns an error if the catalog cannot be read.
pub async fn execute(args: TablesArgs, config: &Config) -> Result<()> {
    let store = config.open_store().await?;
    let namespaces = match args.namespace {
        Some(namespace) => vec![namespace],
        None => store.list_namespaces().await?,
    };

    let mut listings = Vec::new();
    for namespace in &namespaces {
        let tables = store
            .list_tables(namespace)
            .await
            .with_context(|| format!("failed to list namespace {namespace}"))?;
        listings.extend(tables.into_iter().map(|p| TableListing {
            table: p.table.to_string(),
            version: p.version,
            schema_version: p.schema_version,
            row_count: p.row_count,
            committed_at: p.committed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }));
    }

    match config.format {
        OutputFormat::Json => print_json(&listings)?,
        OutputFormat::Text => {
            if namespaces.is_empty() {
                println!("No namespaces found. Run `medallion init` first.");
                return Ok(());
            }
            for namespace in &namespaces {
                println!("{namespace}:");
                let prefix = format!("{namespace}.");
                let mut any = false;
                for listing in listings.iter().filter(|l| l.table.starts_with(&prefix)) {
                    any = true;
                    println!(
                        "  {} v{} ({} rows)",
                        listing.table, listing.version, listing.row_count
                    );
                }
                if !any {
                    println!("  (empty)");
                }
            }
        }
        OutputFormat::Table => {
            if listings.is_empty() {
                println!("No tables found");
            } else {
                println!("{}", Table::new(listings));
            }
        }
    }
    Ok(())
}
