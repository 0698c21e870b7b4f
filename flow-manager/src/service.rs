//! Service orchestration.
//!
//! Wires the shared resources (token bucket, sink) into the three
//! acquisition loops and supervises them until shutdown. Shutdown is
//! structured: one broadcast signal fans out, every loop cancels its
//! outstanding work (the rotation controller awaits cancel acks), and
//! the service joins all tasks before returning.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use flow_common::cache::{HotCache, InMemoryHotCache, RedisHotCache};
use flow_common::record::{CacheKind, Observation};

use crate::catalog::EndpointCatalog;
use crate::config::{CacheBackend, Settings};
use crate::provider::depth::{DepthEvent, DepthFeed};
use crate::provider::vendor::channels::{desired_channels, ChannelName, SubscriptionSet};
use crate::provider::vendor::ws::VendorStreamConsumer;
use crate::provider::vendor::{SessionHandle, VendorRestClient, VendorWsSession};
use crate::ratelimit::TokenBucket;
use crate::rotation::DepthRotationController;
use crate::scheduler::RestScheduler;
use crate::sink::IngestSink;
use crate::storage::PostgresArchive;
use crate::symbol::SymbolUniverse;

/// Forwards validated stream messages into the sink: a bounded-log
/// observation per message, plus a latest-value view for channel
/// families that keep one.
pub struct StreamSinkConsumer {
    sink: Arc<IngestSink>,
}

impl StreamSinkConsumer {
    pub fn new(sink: Arc<IngestSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl VendorStreamConsumer for StreamSinkConsumer {
    async fn on_message(&self, channel: &ChannelName, payload: &Value) {
        let observation = Observation::new(
            channel.log_source(),
            channel.log_scope(),
            CacheKind::BoundedLog,
            payload.clone(),
        );
        let fetched_at = observation.fetched_at;
        self.sink.write(observation).await;

        if let Some(view_source) = channel.snapshot_source() {
            let scope = channel.snapshot_scope(payload);
            self.sink
                .write_view(view_source, &scope, payload, fetched_at)
                .await;
        }
    }
}

/// The assembled acquisition engine.
pub struct IngestionService {
    settings: Settings,
    sink: Arc<IngestSink>,
    scheduler: Arc<RestScheduler>,
    ws_session: VendorWsSession,
    ws_handle: SessionHandle,
    rotation: Option<DepthRotationController>,
}

impl IngestionService {
    /// Build every component from settings.
    ///
    /// `depth_feed` supplies the brokerage session when depth rotation
    /// is enabled; without one the controller is not started.
    pub async fn build(
        settings: Settings,
        depth_feed: Option<(Arc<dyn DepthFeed>, mpsc::UnboundedReceiver<DepthEvent>)>,
    ) -> Result<Self> {
        settings.validate().context("invalid configuration")?;

        let catalog = Arc::new(EndpointCatalog::load_default().context("invalid endpoint catalog")?);
        let universe = Arc::new(SymbolUniverse::with_symbols(
            settings.symbols.universe.iter().cloned(),
        ));

        let estimated = catalog.estimated_requests_per_minute(universe.len());
        info!(
            endpoints = catalog.len(),
            symbols = universe.len(),
            estimated_rpm = estimated,
            budget_rpm = settings.rate_limit.requests_per_minute,
            "endpoint catalog loaded"
        );
        if estimated > settings.rate_limit.requests_per_minute as f64 {
            warn!(
                "steady-state request rate exceeds the rate budget; \
                 lower tiers will be deferred behind T0"
            );
        }

        let hot: Arc<dyn HotCache> = match settings.cache.backend {
            CacheBackend::Memory => {
                Arc::new(InMemoryHotCache::new(settings.cache.log_max_entries))
            }
            CacheBackend::Redis => Arc::new(
                RedisHotCache::connect(
                    &settings.cache.redis_url,
                    settings.cache.log_max_entries,
                    match settings.cache.log_ttl_secs {
                        0 => None,
                        ttl => Some(ttl),
                    },
                )
                .context("failed to connect hot cache")?,
            ),
        };

        let archive = PostgresArchive::from_settings(&settings.database)
            .await
            .context("failed to connect archive database")?;
        archive
            .run_migrations()
            .await
            .context("archive migrations failed")?;

        let sink = Arc::new(IngestSink::new(Arc::new(archive), hot));

        let limiter = Arc::new(TokenBucket::from_settings(&settings.rate_limit));
        let client = Arc::new(
            VendorRestClient::from_settings(&settings.vendor)
                .context("failed to build REST client")?,
        );

        let scheduler = Arc::new(RestScheduler::new(
            catalog,
            Arc::clone(&universe),
            limiter,
            client,
            Arc::clone(&sink),
            settings.scheduler.clone(),
            &settings.rate_limit,
        ));

        let subscriptions = SubscriptionSet::new(desired_channels(&universe.all()));
        let consumer = Arc::new(StreamSinkConsumer::new(Arc::clone(&sink)));
        let (ws_session, ws_handle) = VendorWsSession::new(
            &settings.vendor,
            settings.streaming.clone(),
            subscriptions,
            consumer,
        );

        let rotation = match (settings.depth.enabled, depth_feed) {
            (true, Some((feed, events))) => Some(DepthRotationController::new(
                settings.depth.clone(),
                feed,
                events,
                Arc::clone(&sink),
                universe.all(),
                settings.symbols.depth_pinned.clone(),
            )),
            (true, None) => {
                warn!("depth rotation enabled but no venue feed configured; skipping");
                None
            }
            _ => None,
        };

        Ok(Self {
            settings,
            sink,
            scheduler,
            ws_session,
            ws_handle,
            rotation,
        })
    }

    /// Shared sink handle (stats, tests).
    pub fn sink(&self) -> Arc<IngestSink> {
        Arc::clone(&self.sink)
    }

    /// Run all acquisition loops until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);

        let ctrlc_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
                let _ = ctrlc_tx.send(());
            }
        });

        let mut tasks = Vec::new();

        let scheduler = Arc::clone(&self.scheduler);
        tasks.push(tokio::spawn(scheduler.run(shutdown_tx.subscribe())));

        tasks.push(tokio::spawn(self.ws_session.run(shutdown_tx.subscribe())));

        if let Some(rotation) = self.rotation {
            tasks.push(tokio::spawn(rotation.run(shutdown_tx.subscribe())));
        }

        // Periodic ingestion stats until shutdown
        let sink = Arc::clone(&self.sink);
        let ws_handle = self.ws_handle.clone();
        let mut stats_shutdown = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = stats_shutdown.recv() => break,
                    _ = tick.tick() => {
                        let stats = sink.stats();
                        let health = ws_handle.health();
                        info!(
                            written = stats.written,
                            deduplicated = stats.deduplicated,
                            hot_cache_errors = stats.hot_cache_errors,
                            archive_failures = stats.archive_failures,
                            stream_connected = health.is_connected,
                            stream_reconnects = health.reconnect_count,
                            "ingestion stats"
                        );
                    }
                }
            }
        }));

        info!(
            symbols = self.settings.symbols.universe.len(),
            depth_enabled = self.settings.depth.enabled,
            "ingestion service started"
        );

        for task in tasks {
            let _ = task.await;
        }

        let stats = self.sink.stats();
        info!(
            written = stats.written,
            deduplicated = stats.deduplicated,
            archive_failures = stats.archive_failures,
            "ingestion service stopped"
        );

        Ok(())
    }
}
