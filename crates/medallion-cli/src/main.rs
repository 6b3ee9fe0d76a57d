//! Medallion CLI - command-line interface for the lakehouse.
//!
//! The main entry point for the `medallion` binary.

use anyhow::Result;
use clap::Parser;

use medallion_cli::commands::{overview, pipeline, show, stats, tables};
use medallion_cli::{Cli, Commands};
use medallion_core::observability::init_logging;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    init_logging(config.settings.log_format);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Init => pipeline::init(&config).await,
            Commands::Preflight => pipeline::preflight(&config).await,
            Commands::Load => pipeline::load(&config).await,
            Commands::Refresh(args) => pipeline::refresh(args, &config).await,
            Commands::Run(args) => pipeline::run(args, &config).await,
            Commands::Tables(args) => tables::execute(args, &config).await,
            Commands::Show(args) => show::execute(args, &config).await,
            Commands::Stats(args) => stats::execute(args, &config).await,
            Commands::Overview => overview::execute(&config).await,
        }
    })
}
