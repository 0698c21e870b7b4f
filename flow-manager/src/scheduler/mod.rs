//! REST scheduler and worker pool.
//!
//! Walks the endpoint catalog at each tier's cadence, producing one
//! fetch job per (endpoint, symbol) pair with a deterministic per-pair
//! jitter so thousands of pairs never synchronize into a thundering
//! herd. A worker pool drains the queue in priority order, gated by the
//! shared token bucket.

mod jobs;

pub use jobs::{pair_key, FetchJob, JobQueue};

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use flow_common::record::{CacheKind, Observation, Scope};

use crate::catalog::{EndpointCatalog, EndpointDescriptor};
use crate::config::{RateLimitSettings, SchedulerSettings};
use crate::provider::vendor::{RestError, VendorRestClient};
use crate::ratelimit::TokenBucket;
use crate::sink::IngestSink;
use crate::symbol::SymbolUniverse;

/// REST polling scheduler.
pub struct RestScheduler {
    catalog: Arc<EndpointCatalog>,
    universe: Arc<SymbolUniverse>,
    limiter: Arc<TokenBucket>,
    client: Arc<VendorRestClient>,
    sink: Arc<IngestSink>,
    settings: SchedulerSettings,
    acquire_timeout: Duration,
    queue: JobQueue,
    next_due: Mutex<HashMap<String, Instant>>,
}

impl RestScheduler {
    pub fn new(
        catalog: Arc<EndpointCatalog>,
        universe: Arc<SymbolUniverse>,
        limiter: Arc<TokenBucket>,
        client: Arc<VendorRestClient>,
        sink: Arc<IngestSink>,
        settings: SchedulerSettings,
        rate_settings: &RateLimitSettings,
    ) -> Self {
        Self {
            catalog,
            universe,
            limiter,
            client,
            sink,
            settings,
            acquire_timeout: Duration::from_secs(rate_settings.acquire_timeout_secs),
            queue: JobQueue::new(),
            next_due: Mutex::new(HashMap::new()),
        }
    }

    /// Run the planning loop and worker pool until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            endpoints = self.catalog.len(),
            symbols = self.universe.len(),
            workers = self.settings.workers,
            "REST scheduler started"
        );

        let mut workers = Vec::with_capacity(self.settings.workers);
        for worker_id in 0..self.settings.workers {
            let scheduler = Arc::clone(&self);
            let shutdown = shutdown.resubscribe();
            workers.push(tokio::spawn(async move {
                scheduler.worker_loop(worker_id, shutdown).await;
            }));
        }

        let mut tick =
            tokio::time::interval(Duration::from_millis(self.settings.poll_interval_ms.max(100)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tick.tick() => {
                    let planned = self.plan_cycle(Instant::now());
                    if planned > 0 {
                        debug!(planned, pending = self.queue.pending_len(), "scheduling pass");
                    }
                }
            }
        }

        for worker in workers {
            let _ = worker.await;
        }
        info!("REST scheduler stopped");
    }

    /// One scheduling pass: queue a job for every pair whose cadence has
    /// elapsed. Returns the number of jobs queued.
    pub fn plan_cycle(&self, now: Instant) -> usize {
        let symbols = self.universe.all();
        let mut planned = 0;

        for endpoint in self.catalog.iter() {
            if endpoint.requires_symbol {
                for symbol in &symbols {
                    if self.plan_pair(endpoint, Some(symbol), now) {
                        planned += 1;
                    }
                }
            } else if self.plan_pair(endpoint, None, now) {
                planned += 1;
            }
        }

        planned
    }

    fn plan_pair(&self, endpoint: &EndpointDescriptor, symbol: Option<&str>, now: Instant) -> bool {
        let key = pair_key(endpoint.key, symbol);
        let mut next_due = self.next_due.lock();

        match next_due.get(&key) {
            Some(&due) if now < due => return false,
            _ => {}
        }

        // Whether the job is accepted or suppressed by the pair guard,
        // the pair's next occurrence moves forward: a missed cycle is
        // skipped, never queued behind the stuck one.
        next_due.insert(key, now + jittered_interval(endpoint, symbol));
        drop(next_due);

        let job = FetchJob::new(endpoint.key, symbol.map(|s| s.to_string()));
        let accepted = self.queue.enqueue(job, endpoint.tier.priority(), now);
        if !accepted {
            debug!(
                endpoint = endpoint.key,
                symbol = symbol.unwrap_or("-"),
                "previous job still outstanding, skipping cycle"
            );
        }
        accepted
    }

    /// Access to the job queue (stats and tests).
    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
        debug!(worker_id, "REST worker started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = async {
                    match self.queue.next_due(Instant::now()) {
                        Some(job) => self.process_job(job).await,
                        None => tokio::time::sleep(Duration::from_millis(100)).await,
                    }
                } => {}
            }
        }
        debug!(worker_id, "REST worker stopped");
    }

    /// Execute one job: acquire a token, perform the request, and apply
    /// the retry policy. Public so integration tests can drive workers
    /// deterministically.
    pub async fn process_job(&self, job: FetchJob) {
        let Some(endpoint) = self.catalog.get(&job.endpoint) else {
            error!(endpoint = %job.endpoint, "job references unknown endpoint, dropping");
            self.queue.complete(&job);
            return;
        };

        if self
            .limiter
            .acquire_async(1, self.acquire_timeout)
            .await
            .is_err()
        {
            warn!(
                endpoint = endpoint.key,
                symbol = job.symbol.as_deref().unwrap_or("-"),
                "rate limit defer, requeueing job"
            );
            self.queue.requeue(
                job,
                endpoint.tier.priority(),
                Instant::now() + Duration::from_secs(1),
            );
            return;
        }

        let path = match endpoint.render_path(job.symbol.as_deref()) {
            Ok(path) => path,
            Err(e) => {
                error!(endpoint = endpoint.key, "invalid job for endpoint: {}", e);
                self.queue.complete(&job);
                return;
            }
        };

        match self.client.get_json(&path, endpoint.params).await {
            Ok(payload) => {
                let scope = job
                    .symbol
                    .as_deref()
                    .map(Scope::symbol)
                    .unwrap_or_else(Scope::global);
                let observation =
                    Observation::new(endpoint.source(), scope, CacheKind::Snapshot, payload);
                self.sink.write(observation).await;
                self.queue.complete(&job);
            }

            Err(RestError::RateLimited { retry_after }) => {
                if job.attempt + 1 >= self.settings.rate_limited_max_attempts {
                    error!(
                        endpoint = endpoint.key,
                        symbol = job.symbol.as_deref().unwrap_or("-"),
                        attempts = job.attempt + 1,
                        "giving up after repeated 429s"
                    );
                    self.queue.complete(&job);
                    return;
                }
                let delay = retry_after
                    .unwrap_or(Duration::from_secs(self.settings.default_retry_after_secs));
                warn!(
                    endpoint = endpoint.key,
                    symbol = job.symbol.as_deref().unwrap_or("-"),
                    delay_secs = delay.as_secs(),
                    attempt = job.attempt,
                    "provider rate limited, backing off"
                );
                self.queue
                    .requeue(job, endpoint.tier.priority(), Instant::now() + delay);
            }

            Err(e @ (RestError::Server { .. } | RestError::Network(_))) => {
                if job.attempt == 0 {
                    warn!(
                        endpoint = endpoint.key,
                        symbol = job.symbol.as_deref().unwrap_or("-"),
                        "transient failure, retrying once: {}", e
                    );
                    self.queue.requeue(
                        job,
                        endpoint.tier.priority(),
                        Instant::now() + Duration::from_secs(self.settings.retry_delay_secs),
                    );
                } else {
                    error!(
                        endpoint = endpoint.key,
                        symbol = job.symbol.as_deref().unwrap_or("-"),
                        "retry failed, dropping until next cycle: {}", e
                    );
                    self.queue.complete(&job);
                }
            }

            Err(e) => {
                // 4xx and malformed bodies: permanent for this cycle
                error!(
                    endpoint = endpoint.key,
                    symbol = job.symbol.as_deref().unwrap_or("-"),
                    job_id = %job.id,
                    "permanent request failure, dropping: {}", e
                );
                self.queue.complete(&job);
            }
        }
    }
}

/// Cadence interval with a deterministic +/-10% per-pair offset.
///
/// Hash-derived rather than random so each pair keeps a stable phase,
/// which decorrelates pairs from each other without making test timing
/// nondeterministic.
fn jittered_interval(endpoint: &EndpointDescriptor, symbol: Option<&str>) -> Duration {
    let mut hasher = DefaultHasher::new();
    endpoint.key.hash(&mut hasher);
    symbol.hash(&mut hasher);
    let fraction = (hasher.finish() % 1000) as f64 / 1000.0;
    let factor = 0.9 + 0.2 * fraction;
    Duration::from_secs_f64(endpoint.tier.interval().as_secs_f64() * factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CadenceTier;

    fn descriptor(key: &'static str, tier: CadenceTier, per_symbol: bool) -> EndpointDescriptor {
        EndpointDescriptor {
            key,
            path: if per_symbol {
                "/api/test/{symbol}/data"
            } else {
                "/api/test/data"
            },
            requires_symbol: per_symbol,
            params: &[],
            tier,
        }
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let endpoint = descriptor("jitter_test", CadenceTier::T1, true);
        let base = endpoint.tier.interval().as_secs_f64();

        for symbol in ["SPY", "QQQ", "IWM", "TSLA", "NVDA"] {
            let interval = jittered_interval(&endpoint, Some(symbol)).as_secs_f64();
            assert!(interval >= base * 0.9 && interval <= base * 1.1);
        }
    }

    #[test]
    fn jitter_is_deterministic_per_pair() {
        let endpoint = descriptor("jitter_test", CadenceTier::T1, true);
        let a = jittered_interval(&endpoint, Some("SPY"));
        let b = jittered_interval(&endpoint, Some("SPY"));
        assert_eq!(a, b);
    }

    #[test]
    fn jitter_differs_across_pairs() {
        let endpoint = descriptor("jitter_test", CadenceTier::T1, true);
        let spy = jittered_interval(&endpoint, Some("SPY"));
        let qqq = jittered_interval(&endpoint, Some("QQQ"));
        assert_ne!(spy, qqq);
    }
}
