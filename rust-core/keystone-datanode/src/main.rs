// SPDX-License-Identifier: PMPL-1.0-or-later
//! Keystone datanode binary
//!
//! Opens the node's WAL, resumes unfinished procedures and purges the log in
//! the background until interrupted.

use std::path::PathBuf;

use clap::Parser;
use keystone_datanode::{init_logging, Datanode, NodeConfig};

#[derive(Parser, Debug)]
#[command(name = "keystone-datanode", version, about = "Keystone datanode")]
struct Cli {
    /// JSON config file. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file and KEYSTONE_DATA_DIR.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    init_logging(config.log_format)?;

    tracing::info!(
        "Starting Keystone datanode in {}",
        config.data_dir.display()
    );

    let node = Datanode::open(config)?;
    let report = node.start().await?;
    for skipped in &report.skipped {
        tracing::warn!(
            procedure_id = %skipped.id,
            type_name = %skipped.type_name,
            "Procedure has no registered loader"
        );
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    node.shutdown().await?;

    Ok(())
}
