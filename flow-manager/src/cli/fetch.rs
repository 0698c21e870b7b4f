//! Fetch command - one-shot fetch of a single endpoint

use anyhow::{anyhow, Result};
use clap::Args;
use tracing::info;

use crate::catalog::EndpointCatalog;
use crate::config::Settings;
use crate::provider::vendor::VendorRestClient;

/// Arguments for the fetch command
#[derive(Args)]
pub struct FetchArgs {
    /// Endpoint catalog key (see `catalog`)
    #[arg(long, short)]
    pub endpoint: String,

    /// Symbol for per-symbol endpoints
    #[arg(long, short)]
    pub symbol: Option<String>,

    /// Configuration file path
    #[arg(long, short)]
    pub config: Option<String>,
}

/// Execute the fetch command
pub async fn execute(args: FetchArgs) -> Result<()> {
    let settings = Settings::load(args.config.as_deref())?;
    let catalog = EndpointCatalog::load_default()?;

    let endpoint = catalog
        .get(&args.endpoint)
        .ok_or_else(|| anyhow!("unknown endpoint: {}", args.endpoint))?;

    let symbol = args.symbol.as_deref().map(str::to_uppercase);
    let path = endpoint.render_path(symbol.as_deref())?;

    info!(endpoint = endpoint.key, path, "fetching");

    let client = VendorRestClient::from_settings(&settings.vendor)?;
    let payload = client.get_json(&path, endpoint.params).await?;

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
