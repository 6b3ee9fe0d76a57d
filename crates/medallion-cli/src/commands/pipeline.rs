//! Pipeline commands: init, preflight, load, refresh and run.

use anyhow::{Result, bail};
use clap::Args;
use owo_colors::OwoColorize;
use tabled::{Table, Tabled};

use medallion_flow::cancel::CancellationToken;
use medallion_flow::engine::RefreshOptions;
use medallion_flow::pipeline::Pipeline;
use medallion_flow::report::RefreshReport;
use medallion_ingest::loader::{LoadReport, PreflightReport, SourceStatus};

use crate::output::{colored_status, print_json};
use crate::{Config, OutputFormat};

/// Arguments for the refresh and run commands.
#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Recompute every table even when its inputs are unchanged.
    #[arg(long)]
    pub force: bool,

    /// Maximum tables refreshed concurrently within a stage.
    #[arg(long, env = "MEDALLION_MAX_PARALLEL_REFRESH")]
    pub max_parallel: Option<usize>,
}

impl RefreshArgs {
    fn apply(&self, pipeline: Pipeline, config: &Config) -> Pipeline {
        pipeline.with_refresh_options(RefreshOptions {
            max_parallel: self
                .max_parallel
                .unwrap_or(config.settings.max_parallel_refresh),
            force: self.force,
        })
    }
}

/// Execute the init command.
///
/// # Errors
///
/// Returns an error if the catalog cannot be opened or a namespace cannot be
/// created.
pub async fn init(config: &Config) -> Result<()> {
    let pipeline = config.load_pipeline(config.open_store().await?)?;
    let created = pipeline.init().await?;

    match config.format {
        OutputFormat::Json => print_json(&serde_json::json!({ "namespacesCreated": created }))?,
        OutputFormat::Text | OutputFormat::Table => {
            for namespace in &pipeline.definition().namespaces {
                let state = if created.contains(namespace) {
                    "created".green().to_string()
                } else {
                    "exists".dimmed().to_string()
                };
                println!("  {namespace} {state}");
            }
        }
    }
    Ok(())
}

/// Execute the preflight command.
///
/// # Errors
///
/// Returns an error if any source is not ready.
pub async fn preflight(config: &Config) -> Result<()> {
    let pipeline = config.load_pipeline(config.open_store().await?)?;
    let report = pipeline.preflight();
    print_preflight(&report, config.format)?;
    if !report.is_ready() {
        bail!("preflight failed: some extract sources are not ready");
    }
    Ok(())
}

/// Execute the load command.
///
/// # Errors
///
/// Returns an error if any mapping failed.
pub async fn load(config: &Config) -> Result<()> {
    let pipeline = config.load_pipeline(config.open_store().await?)?;
    let report = pipeline.load().await;
    print_load(&report, config.format)?;
    if !report.is_success() {
        bail!("bronze load failed for {} mapping(s)", report.failed());
    }
    Ok(())
}

/// Execute the refresh command.
///
/// # Errors
///
/// Returns an error if the rules cannot run or any table did not end fresh.
pub async fn refresh(args: RefreshArgs, config: &Config) -> Result<()> {
    let pipeline = args.apply(config.load_pipeline(config.open_store().await?)?, config);
    let cancel = cancel_on_ctrl_c();
    let report = pipeline.refresh(&cancel).await?;
    print_refresh(&report, config.format)?;
    check_refresh(&report)
}

/// Execute the run command.
///
/// # Errors
///
/// Returns an error if any mapping failed or any table did not end fresh.
pub async fn run(args: RefreshArgs, config: &Config) -> Result<()> {
    let pipeline = args.apply(config.load_pipeline(config.open_store().await?)?, config);
    let cancel = cancel_on_ctrl_c();
    let report = pipeline.run(&cancel).await?;

    if config.format == OutputFormat::Json {
        print_json(&report)?;
    } else {
        if !report.namespaces_created.is_empty() {
            println!("Created namespaces: {}", report.namespaces_created.join(", "));
            println!();
        }
        print_load(&report.load, config.format)?;
        println!();
        print_refresh(&report.refresh, config.format)?;
    }

    if !report.load.is_success() {
        bail!("bronze load failed for {} mapping(s)", report.load.failed());
    }
    check_refresh(&report.refresh)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling refresh");
            handle.cancel();
        }
    });
    cancel
}

fn check_refresh(report: &RefreshReport) -> Result<()> {
    if report.cancelled {
        bail!("refresh cancelled");
    }
    if !report.is_success() {
        bail!(
            "refresh finished with {} failed and {} blocked table(s)",
            report.summary.failed,
            report.summary.blocked
        );
    }
    Ok(())
}

fn print_preflight(report: &PreflightReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Text | OutputFormat::Table => {
            for check in &report.checks {
                let detail = match &check.status {
                    SourceStatus::Ready { bytes, columns } => {
                        format!("{} ({columns} columns, {bytes} bytes)", colored_status("ready"))
                    }
                    SourceStatus::Missing => colored_status("missing"),
                    SourceStatus::Empty => colored_status("empty"),
                    SourceStatus::Malformed { message } => {
                        format!("{}: {message}", colored_status("malformed"))
                    }
                };
                println!("  {} <- {} {detail}", check.table, check.source.display());
            }
        }
    }
    Ok(())
}

fn print_load(report: &LoadReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Text => {
            println!("Bronze load:");
            for mapping in &report.mappings {
                let rows = mapping
                    .row_count
                    .map_or(String::new(), |n| format!(" {n} rows"));
                println!(
                    "  {} {}{rows}",
                    mapping.table,
                    colored_status(mapping.status.as_str())
                );
                if let Some(error) = &mapping.error {
                    println!("    Error: {}", error.red());
                }
            }
        }
        OutputFormat::Table => {
            #[derive(Tabled)]
            struct LoadRow {
                #[tabled(rename = "Table")]
                table: String,
                #[tabled(rename = "Status")]
                status: String,
                #[tabled(rename = "Version")]
                version: String,
                #[tabled(rename = "Rows")]
                rows: String,
                #[tabled(rename = "Error")]
                error: String,
            }

            let rows: Vec<_> = report
                .mappings
                .iter()
                .map(|m| LoadRow {
                    table: m.table.to_string(),
                    status: m.status.to_string(),
                    version: optional(m.version),
                    rows: optional(m.row_count),
                    error: m.error.clone().unwrap_or_default(),
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}

fn print_refresh(report: &RefreshReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(report)?,
        OutputFormat::Text => {
            println!("Refresh cycle {}:", report.cycle_id);
            for entry in &report.tables {
                let detail = match (&entry.error, &entry.blocked_by) {
                    (Some(error), _) => format!(" {}", error.red()),
                    (None, Some(cause)) => format!(" (upstream {cause} failed)"),
                    (None, None) => entry
                        .version
                        .map_or(String::new(), |v| format!(" v{v}")),
                };
                println!(
                    "  [{}] {} {}{detail}",
                    entry.stage,
                    entry.table,
                    colored_status(entry.status.as_str())
                );
            }
            let s = &report.summary;
            println!(
                "Summary: {} recomputed, {} unchanged, {} failed, {} blocked, {} cancelled",
                s.recomputed, s.skipped_unchanged, s.failed, s.blocked, s.cancelled
            );
        }
        OutputFormat::Table => {
            #[derive(Tabled)]
            struct RefreshRow {
                #[tabled(rename = "Stage")]
                stage: usize,
                #[tabled(rename = "Table")]
                table: String,
                #[tabled(rename = "Status")]
                status: String,
                #[tabled(rename = "Version")]
                version: String,
                #[tabled(rename = "Rows")]
                rows: String,
                #[tabled(rename = "ms")]
                duration_ms: u64,
            }

            let rows: Vec<_> = report
                .tables
                .iter()
                .map(|t| RefreshRow {
                    stage: t.stage,
                    table: t.table.to_string(),
                    status: t.status.to_string(),
                    version: optional(t.version),
                    rows: optional(t.row_count),
                    duration_ms: t.duration_ms,
                })
                .collect();
            println!("{}", Table::new(rows));
        }
    }
    Ok(())
}

fn optional(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
