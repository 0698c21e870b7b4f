//! Catalog command - inspect the endpoint catalog

use anyhow::Result;
use clap::Args;

use crate::catalog::EndpointCatalog;
use crate::config::Settings;

/// Arguments for the catalog command
#[derive(Args)]
pub struct CatalogArgs {
    /// Configuration file path
    #[arg(long, short)]
    pub config: Option<String>,
}

/// Execute the catalog command
pub fn execute(args: CatalogArgs) -> Result<()> {
    let settings = Settings::load(args.config.as_deref()).unwrap_or_else(|_| {
        // Catalog inspection works without a full config
        Settings::default_settings()
    });
    let catalog = EndpointCatalog::load_default()?;

    println!(
        "{:<36} {:>4} {:>8} {}",
        "KEY", "TIER", "SCOPE", "PATH"
    );
    for endpoint in catalog.iter() {
        println!(
            "{:<36} {:>4} {:>8} {}",
            endpoint.key,
            endpoint.tier.as_str(),
            if endpoint.requires_symbol {
                "symbol"
            } else {
                "global"
            },
            endpoint.path,
        );
    }

    let universe_size = settings.symbols.universe.len();
    println!(
        "\n{} endpoints; ~{:.1} requests/min for a {}-symbol universe (budget: {}/min)",
        catalog.len(),
        catalog.estimated_requests_per_minute(universe_size),
        universe_size,
        settings.rate_limit.requests_per_minute,
    );

    Ok(())
}
