//! Branchwatch - branch network monitoring engine
//!
//! This is the daemon entry point: load configuration from the
//! environment, start the engine, and run until interrupted.

use anyhow::Result;
use branchwatch::config::EngineConfig;
use branchwatch::engine::MonitorEngine;
use clap::Parser;
use tracing::info;

/// Branch network monitoring engine
#[derive(Debug, Parser)]
#[command(name = "branchwatch", version, about)]
struct Cli {
    /// Override the relational store path (BRANCHWATCH_DATABASE_PATH)
    #[arg(long)]
    database_path: Option<std::path::PathBuf>,

    /// Override the time-series store URL (BRANCHWATCH_TIMESERIES_URL)
    #[arg(long)]
    timeseries_url: Option<String>,

    /// Validate configuration and exit without starting the engine
    #[arg(long)]
    check_config: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("branchwatch=info".parse()?);
    if cli.json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = EngineConfig::from_env()?;
    if let Some(path) = cli.database_path {
        config.database_path = path;
    }
    if let Some(url) = cli.timeseries_url {
        config.timeseries_url = url;
    }

    if cli.check_config {
        info!("configuration OK");
        return Ok(());
    }

    let engine = MonitorEngine::start(config).await?;
    info!("branchwatch is monitoring; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    engine.shutdown().await;
    Ok(())
}
