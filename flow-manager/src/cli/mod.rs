//! Command-line interface.

pub mod catalog;
pub mod db;
pub mod fetch;
pub mod serve;

use clap::{Parser, Subcommand};

/// Market telemetry acquisition engine
#[derive(Parser)]
#[command(name = "flow-manager", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the acquisition engine
    Serve(serve::ServeArgs),
    /// Fetch a single endpoint once and print the result
    Fetch(fetch::FetchArgs),
    /// Print the endpoint catalog and request-rate estimate
    Catalog(catalog::CatalogArgs),
    /// Archive database operations
    Db(db::DbArgs),
}
