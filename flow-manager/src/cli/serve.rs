//! Serve command - start the acquisition engine

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use crate::config::Settings;
use crate::provider::depth::{DepthFeed, ScriptedDepthFeed};
use crate::service::IngestionService;

/// Arguments for the serve command
#[derive(Args)]
pub struct ServeArgs {
    /// Configuration file path
    #[arg(long, short)]
    pub config: Option<String>,

    /// Symbols to poll and stream (comma-separated; overrides config)
    #[arg(long, short)]
    pub symbols: Option<String>,

    /// Enable depth rotation against a scripted in-process venue
    /// (no real brokerage transport is configured in this build)
    #[arg(long)]
    pub depth_demo: bool,
}

/// Execute the serve command
pub async fn execute(args: ServeArgs) -> Result<()> {
    let mut settings = Settings::load(args.config.as_deref())?;

    if let Some(ref symbols) = args.symbols {
        settings.symbols.universe = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(
        symbols = ?settings.symbols.universe,
        depth_enabled = settings.depth.enabled,
        "starting acquisition engine"
    );

    let depth_feed = if args.depth_demo {
        settings.depth.enabled = true;
        let (feed, events) = ScriptedDepthFeed::new();
        warn!("depth rotation running against the scripted venue");
        Some((Arc::new(feed) as Arc<dyn DepthFeed>, events))
    } else {
        None
    };

    let service = IngestionService::build(settings, depth_feed).await?;
    service.run().await
}
