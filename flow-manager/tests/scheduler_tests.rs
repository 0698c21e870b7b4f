//! Scheduler behavior against a mock HTTP vendor: the scheduling pass,
//! rate-budget deferral, and the per-status retry policy.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use flow_common::cache::{HotCache, InMemoryHotCache};
use flow_manager::catalog::{CadenceTier, EndpointCatalog, EndpointDescriptor};
use flow_manager::config::{RateLimitSettings, SchedulerSettings, VendorSettings};
use flow_manager::provider::vendor::VendorRestClient;
use flow_manager::ratelimit::TokenBucket;
use flow_manager::scheduler::RestScheduler;
use flow_manager::sink::IngestSink;
use flow_manager::storage::{ArchiveStore, MemoryArchive};
use flow_manager::symbol::SymbolUniverse;

fn test_catalog() -> EndpointCatalog {
    EndpointCatalog::from_entries(vec![
        EndpointDescriptor {
            key: "global_pulse",
            path: "/api/global-pulse",
            requires_symbol: false,
            params: &[],
            tier: CadenceTier::T0,
        },
        EndpointDescriptor {
            key: "symbol_state",
            path: "/api/state/{symbol}",
            requires_symbol: true,
            params: &[],
            tier: CadenceTier::T1,
        },
    ])
    .unwrap()
}

struct Harness {
    scheduler: Arc<RestScheduler>,
    archive: Arc<MemoryArchive>,
    limiter: Arc<TokenBucket>,
}

fn build_harness(server_uri: &str, bucket: TokenBucket, acquire_timeout_secs: u64) -> Harness {
    let archive = Arc::new(MemoryArchive::new());
    let hot = Arc::new(InMemoryHotCache::new(100));
    let sink = Arc::new(IngestSink::new(
        Arc::clone(&archive) as Arc<dyn flow_manager::storage::ArchiveStore>,
        hot as Arc<dyn HotCache>,
    ));

    let vendor = VendorSettings {
        rest_base_url: server_uri.to_string(),
        websocket_url: "wss://unused".to_string(),
        api_token: "test-token".to_string(),
        request_timeout_secs: 5,
    };
    let client = Arc::new(VendorRestClient::from_settings(&vendor).unwrap());

    let limiter = Arc::new(bucket);
    let scheduler_settings = SchedulerSettings {
        workers: 1,
        poll_interval_ms: 100,
        retry_delay_secs: 0,
        default_retry_after_secs: 0,
        rate_limited_max_attempts: 3,
    };
    let rate_settings = RateLimitSettings {
        requests_per_minute: 100,
        burst_capacity: None,
        acquire_timeout_secs,
    };

    let scheduler = Arc::new(RestScheduler::new(
        Arc::new(test_catalog()),
        Arc::new(SymbolUniverse::with_symbols(vec![
            "A".to_string(),
            "B".to_string(),
        ])),
        Arc::clone(&limiter),
        client,
        sink,
        scheduler_settings,
        &rate_settings,
    ));

    Harness {
        scheduler,
        archive,
        limiter,
    }
}

#[tokio::test]
async fn scheduling_pass_with_limited_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    // Capacity 2, refill 2/min: only two of the three jobs can go now.
    let harness = build_harness(&server.uri(), TokenBucket::new(2, 2.0 / 60.0), 0);
    let scheduler = &harness.scheduler;

    let now = tokio::time::Instant::now();
    let planned = scheduler.plan_cycle(now);
    assert_eq!(planned, 3, "one global + one per symbol for [A, B]");
    assert_eq!(scheduler.queue().pending_len(), 3);

    // Replanning immediately adds nothing: cadences have not elapsed.
    assert_eq!(scheduler.plan_cycle(now), 0);

    // Dispatch order is priority-ordered: the T0 global job first.
    let first = scheduler.queue().next_due(now).unwrap();
    assert_eq!(first.endpoint, "global_pulse");
    scheduler.process_job(first).await;

    let second = scheduler.queue().next_due(now).unwrap();
    assert_eq!(second.endpoint, "symbol_state");
    scheduler.process_job(second).await;

    assert_eq!(harness.archive.row_count(), 2);
    assert!(!harness.limiter.try_acquire(1), "budget exhausted");

    // The third job defers on the rate limiter and is requeued, not lost.
    let third = scheduler.queue().next_due(now).unwrap();
    scheduler.process_job(third).await;
    assert_eq!(harness.archive.row_count(), 2);
    assert_eq!(scheduler.queue().pending_len(), 1);
    assert_eq!(scheduler.queue().in_flight_len(), 0);
}

#[tokio::test]
async fn http_429_backs_off_and_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/global-pulse"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/global-pulse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let harness = build_harness(&server.uri(), TokenBucket::new(100, 100.0), 5);
    let scheduler = &harness.scheduler;

    let now = tokio::time::Instant::now();
    scheduler.plan_cycle(now);

    // Pull just the global job
    let job = scheduler.queue().next_due(now).unwrap();
    assert_eq!(job.endpoint, "global_pulse");
    scheduler.process_job(job).await;

    // Requeued with the provider's Retry-After (the two symbol jobs
    // from the scheduling pass are still pending too)
    assert_eq!(scheduler.queue().pending_len(), 3);
    assert_eq!(scheduler.queue().in_flight_len(), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let retried = scheduler
        .queue()
        .next_due(tokio::time::Instant::now())
        .expect("retry should be due after Retry-After");
    assert_eq!(retried.endpoint, "global_pulse");
    assert_eq!(retried.attempt, 1);
    scheduler.process_job(retried).await;

    assert_eq!(harness.archive.row_count(), 1);
}

#[tokio::test]
async fn http_5xx_is_retried_exactly_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/global-pulse"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/global-pulse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": 1})))
        .mount(&server)
        .await;

    let harness = build_harness(&server.uri(), TokenBucket::new(100, 100.0), 5);
    let scheduler = &harness.scheduler;

    let now = tokio::time::Instant::now();
    scheduler.plan_cycle(now);

    let job = scheduler.queue().next_due(now).unwrap();
    scheduler.process_job(job).await;

    // retry_delay_secs = 0: the retry is due immediately
    let retry = scheduler
        .queue()
        .next_due(tokio::time::Instant::now())
        .expect("transient failure requeues once");
    assert_eq!(retry.attempt, 1);
    scheduler.process_job(retry).await;

    assert_eq!(harness.archive.row_count(), 1);
}

#[tokio::test]
async fn persistent_5xx_drops_after_single_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let harness = build_harness(&server.uri(), TokenBucket::new(100, 100.0), 5);
    let scheduler = &harness.scheduler;

    let now = tokio::time::Instant::now();
    scheduler.plan_cycle(now);

    let job = scheduler.queue().next_due(now).unwrap();
    let pair_endpoint = job.endpoint.clone();
    scheduler.process_job(job).await;

    let retry = scheduler.queue().next_due(tokio::time::Instant::now()).unwrap();
    assert_eq!(retry.endpoint, pair_endpoint);
    scheduler.process_job(retry).await;

    // Dropped: nothing pending or in flight for the pair, nothing stored
    assert_eq!(harness.archive.row_count(), 0);
    assert_eq!(scheduler.queue().in_flight_len(), 0);

    // The pair schedules again on its next cadence occurrence
    let next_cycle = now + CadenceTier::T0.interval() + Duration::from_secs(5);
    assert!(scheduler.plan_cycle(next_cycle) >= 1);
}

#[tokio::test]
async fn http_404_is_dropped_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such symbol"))
        .mount(&server)
        .await;

    let harness = build_harness(&server.uri(), TokenBucket::new(100, 100.0), 5);
    let scheduler = &harness.scheduler;

    let now = tokio::time::Instant::now();
    scheduler.plan_cycle(now);

    while let Some(job) = scheduler.queue().next_due(tokio::time::Instant::now()) {
        scheduler.process_job(job).await;
    }

    assert_eq!(harness.archive.row_count(), 0);
    assert_eq!(scheduler.queue().pending_len(), 0);
    assert_eq!(scheduler.queue().in_flight_len(), 0);
}

#[tokio::test]
async fn success_writes_snapshot_observations() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/state/A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "open"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pulse": 1})))
        .mount(&server)
        .await;

    let harness = build_harness(&server.uri(), TokenBucket::new(100, 100.0), 5);
    let scheduler = &harness.scheduler;

    let now = tokio::time::Instant::now();
    scheduler.plan_cycle(now);
    while let Some(job) = scheduler.queue().next_due(tokio::time::Instant::now()) {
        scheduler.process_job(job).await;
    }

    assert_eq!(harness.archive.row_count(), 3);
    let rows = harness
        .archive
        .query_range(
            "rest:symbol_state",
            Some(&flow_common::record::Scope::symbol("A")),
            chrono::Utc::now() - chrono::Duration::minutes(1),
            chrono::Utc::now() + chrono::Duration::minutes(1),
            10,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, json!({"state": "open"}));
}
