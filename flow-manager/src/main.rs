//! Flow Manager CLI
//!
//! Commands:
//! - `serve`: start the acquisition engine
//! - `fetch`: one-shot fetch of a single endpoint (debugging)
//! - `catalog`: inspect the endpoint catalog
//! - `db`: archive database operations

use anyhow::Result;
use clap::Parser;

use flow_common::logging::{init_logging, LogConfig};
use flow_manager::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_logging(LogConfig::from_env()).map_err(|e| anyhow::anyhow!("logging init: {}", e))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => flow_manager::cli::serve::execute(args).await?,
        Commands::Fetch(args) => flow_manager::cli::fetch::execute(args).await?,
        Commands::Catalog(args) => flow_manager::cli::catalog::execute(args)?,
        Commands::Db(args) => flow_manager::cli::db::execute(args).await?,
    }

    Ok(())
}
