//! Output helpers shared by the commands.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use tabled::builder::Builder;
use tabled::settings::Style;

use medallion_catalog::schema::{Row, Schema};

/// Prints `value` as pretty JSON.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Colors a status label for terminal output.
#[must_use]
pub fn colored_status(status: &str) -> String {
    match status {
        "recomputed" | "created" | "ready" => status.green().to_string(),
        "failed" | "missing" | "empty" | "malformed" => status.red().to_string(),
        "blocked" | "cancelled" => status.yellow().to_string(),
        "skipped-unchanged" | "already-present" => status.dimmed().to_string(),
        _ => status.to_string(),
    }
}

/// Renders a header and string cells as a rounded table.
#[must_use]
pub fn render_table<H, R>(header: H, rows: R) -> String
where
    H: IntoIterator<Item = String>,
    R: IntoIterator<Item = Vec<String>>,
{
    let mut builder = Builder::default();
    builder.push_record(header);
    for row in rows {
        builder.push_record(row);
    }
    let mut table = builder.build();
    table.with(Style::rounded());
    table.to_string()
}

/// Renders catalog rows under their schema.
#[must_use]
pub fn render_rows(schema: &Schema, rows: &[Row]) -> String {
    render_table(
        schema.column_names().into_iter().map(String::from),
        rows.iter()
            .map(|row| row.iter().map(ToString::to_string).collect()),
    )
}

/// Renders catalog rows as tab-separated lines with a header.
#[must_use]
pub fn render_plain(schema: &Schema, rows: &[Row]) -> String {
    let mut out = schema.column_names().join("\t");
    for row in rows {
        out.push('\n');
        let cells: Vec<String> = row.iter().map(ToString::to_string).collect();
        out.push_str(&cells.join("\t"));
    }
    out
}
