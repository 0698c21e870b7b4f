//! Db command - archive database operations

use anyhow::Result;
use clap::{Args, Subcommand};
use tracing::info;

use crate::config::Settings;
use crate::storage::PostgresArchive;

/// Arguments for the db command
#[derive(Args)]
pub struct DbArgs {
    #[command(subcommand)]
    pub command: DbCommand,

    /// Configuration file path
    #[arg(long, short)]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum DbCommand {
    /// Create the archive schema
    Migrate,
}

/// Execute the db command
pub async fn execute(args: DbArgs) -> Result<()> {
    let settings = Settings::load(args.config.as_deref())?;

    match args.command {
        DbCommand::Migrate => {
            info!("connecting to archive database");
            let archive = PostgresArchive::from_settings(&settings.database).await?;
            archive.run_migrations().await?;
            info!("migrations applied");
        }
    }

    Ok(())
}
