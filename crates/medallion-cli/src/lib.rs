//! # medallion-cli
//!
//! Command-line interface for the medallion lakehouse.
//!
//! ## Commands
//!
//! - `medallion init` - Create the pipeline's namespaces
//! - `medallion preflight` - Check every extract source
//! - `medallion load` - Load extracts into bronze
//! - `medallion refresh` - Rebuild derived tables whose inputs changed
//! - `medallion run` - `init`, `load` and `refresh` in one go
//! - `medallion tables` - List namespaces and tables
//! - `medallion show` - Print a table's schema and rows
//! - `medallion stats` - Row counts, distinct counts and aggregates
//! - `medallion overview` - Population and data quality overview
//!
//! ## Configuration
//!
//! Flags override the environment:
//!
//! - `MEDALLION_CATALOG_ROOT` - Catalog directory (default: `lakehouse`)
//! - `MEDALLION_PIPELINE` - Pipeline definition (default: `pipeline.json`)
//! - `MEDALLION_LOG_FORMAT` - `pretty` or `json` logs on stderr
//!
//! The remaining `MEDALLION_*` settings are read by
//! [`Settings::from_env`](medallion_core::settings::Settings::from_env).

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;
pub mod output;
pub mod overview;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use medallion_catalog::{CatalogStore, StoreOptions};
use medallion_core::settings::Settings;
use medallion_flow::pipeline::{Pipeline, PipelineDefinition};

/// Medallion lakehouse command-line interface.
#[derive(Debug, Parser)]
#[command(name = "medallion")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Catalog directory.
    #[arg(long, env = "MEDALLION_CATALOG_ROOT")]
    pub catalog: Option<PathBuf>,

    /// Pipeline definition file.
    #[arg(
        long,
        short = 'p',
        env = "MEDALLION_PIPELINE",
        default_value = "pipeline.json"
    )]
    pub pipeline: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Builds the effective configuration from the environment and flags.
    ///
    /// # Errors
    ///
    /// Returns an error if a `MEDALLION_*` variable is malformed.
    pub fn config(&self) -> Result<Config> {
        let mut settings = Settings::from_env().context("invalid MEDALLION_* environment")?;
        if let Some(root) = &self.catalog {
            settings.catalog_root.clone_from(root);
        }
        Ok(Config {
            settings,
            pipeline: self.pipeline.clone(),
            format: self.format,
        })
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the namespaces the pipeline declares.
    Init,
    /// Check that every extract source exists and is readable.
    Preflight,
    /// Load extracts into bronze tables.
    Load,
    /// Rebuild derived tables whose inputs changed.
    Refresh(commands::pipeline::RefreshArgs),
    /// Create namespaces, load bronze and refresh.
    Run(commands::pipeline::RefreshArgs),
    /// List namespaces and their tables.
    Tables(commands::tables::TablesArgs),
    /// Show a table's schema and rows.
    Show(commands::show::ShowArgs),
    /// Count, distinct and aggregate statistics for a table.
    Stats(commands::stats::StatsArgs),
    /// Population and data quality overview.
    Overview,
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Runtime settings.
    pub settings: Settings,
    /// Pipeline definition file.
    pub pipeline: PathBuf,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Configuration with default settings.
    #[must_use]
    pub fn new(catalog_root: impl Into<PathBuf>, pipeline: impl Into<PathBuf>) -> Self {
        Self {
            settings: Settings {
                catalog_root: catalog_root.into(),
                ..Settings::default()
            },
            pipeline: pipeline.into(),
            format: OutputFormat::default(),
        }
    }

    /// Opens the catalog under the configured root.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened as a catalog.
    pub async fn open_store(&self) -> Result<Arc<CatalogStore>> {
        let root = &self.settings.catalog_root;
        let store = CatalogStore::open_local(root.clone(), StoreOptions::from(&self.settings))
            .await
            .with_context(|| format!("failed to open catalog at {}", root.display()))?;
        Ok(Arc::new(store))
    }

    /// Loads the pipeline definition and binds it to `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition cannot be read or its rules are
    /// invalid.
    pub fn load_pipeline(&self, store: Arc<CatalogStore>) -> Result<Pipeline> {
        let definition = PipelineDefinition::load(&self.pipeline)?;
        Pipeline::with_settings(store, definition, &self.settings)
            .with_context(|| format!("invalid pipeline {}", self.pipeline.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_config_from_flags() {
        let cli = Cli::parse_from([
            "medallion",
            "--catalog",
            "/tmp/lake",
            "--pipeline",
            "demos/ondoriya/pipeline.json",
            "--format",
            "json",
            "refresh",
            "--force",
        ]);

        let config = cli.config().unwrap();
        assert_eq!(config.settings.catalog_root, PathBuf::from("/tmp/lake"));
        assert_eq!(config.pipeline, PathBuf::from("demos/ondoriya/pipeline.json"));
        assert_eq!(config.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Refresh(ref args) if args.force));
    }

    #[test]
    fn show_requires_a_table() {
        assert!(Cli::try_parse_from(["medallion", "show"]).is_err());
    }
}
