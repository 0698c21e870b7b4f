//! Sink behavior: dedup, snapshot overwrite, bounded logs, and archive
//! fault isolation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use flow_common::cache::{HotCache, InMemoryHotCache};
use flow_common::record::{CacheKind, Observation, Scope};
use flow_manager::sink::{IngestSink, WriteResult};
use flow_manager::storage::MemoryArchive;

fn sink_with_stores() -> (Arc<IngestSink>, Arc<MemoryArchive>, Arc<InMemoryHotCache>) {
    let archive = Arc::new(MemoryArchive::new());
    let hot = Arc::new(InMemoryHotCache::new(5));
    let sink = Arc::new(
        IngestSink::new(
            Arc::clone(&archive) as Arc<dyn flow_manager::storage::ArchiveStore>,
            Arc::clone(&hot) as Arc<dyn HotCache>,
        )
        .with_archive_retry_delay(Duration::from_millis(1)),
    );
    (sink, archive, hot)
}

#[tokio::test]
async fn identical_payloads_dedupe_to_one_row() {
    let (sink, archive, _) = sink_with_stores();

    let first = Observation::new(
        "rest:stock_greek_exposure",
        Scope::symbol("SPY"),
        CacheKind::Snapshot,
        json!({"gamma": 1.5, "delta": -0.2}),
    );
    let hash = first.content_hash();
    let first_fetch = first.fetched_at;

    assert_eq!(sink.write(first).await, WriteResult::Inserted);

    // Same content fetched again later
    let mut second = Observation::new(
        "rest:stock_greek_exposure",
        Scope::symbol("SPY"),
        CacheKind::Snapshot,
        json!({"delta": -0.2, "gamma": 1.5}),
    );
    second.fetched_at = first_fetch + chrono::Duration::seconds(60);
    assert_eq!(second.content_hash(), hash);
    assert_eq!(sink.write(second).await, WriteResult::Deduplicated);

    assert_eq!(archive.row_count(), 1);
    let row = archive
        .get("rest:stock_greek_exposure", &Scope::symbol("SPY"), &hash)
        .unwrap();
    assert_eq!(row.fetched_at, first_fetch + chrono::Duration::seconds(60));
    assert_eq!(row.content_hash, hash);

    let stats = sink.stats();
    assert_eq!(stats.written, 1);
    assert_eq!(stats.deduplicated, 1);
}

#[tokio::test]
async fn changed_payload_creates_a_second_row() {
    let (sink, archive, _) = sink_with_stores();

    let a = Observation::new(
        "rest:market_tide",
        Scope::global(),
        CacheKind::Snapshot,
        json!({"tide": 1}),
    );
    let b = Observation::new(
        "rest:market_tide",
        Scope::global(),
        CacheKind::Snapshot,
        json!({"tide": 2}),
    );

    assert_eq!(sink.write(a).await, WriteResult::Inserted);
    assert_eq!(sink.write(b).await, WriteResult::Inserted);
    assert_eq!(archive.row_count(), 2);
}

#[tokio::test]
async fn snapshot_reads_only_latest_value() {
    let (sink, _, hot) = sink_with_stores();
    let scope = Scope::symbol("SPY");

    for value in 1..=3 {
        let obs = Observation::new(
            "rest:stock_state",
            scope.clone(),
            CacheKind::Snapshot,
            json!({"value": value}),
        );
        sink.write(obs).await;
    }

    let snapshot = hot
        .get_snapshot("rest:stock_state", &scope)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.payload, json!({"value": 3}));
}

#[tokio::test]
async fn bounded_log_keeps_a_capped_tail() {
    let (sink, _, hot) = sink_with_stores();
    let scope = Scope::symbol("SPY");

    // Cache cap is 5
    for value in 0..8 {
        let obs = Observation::new(
            "ws:option_trades",
            scope.clone(),
            CacheKind::BoundedLog,
            json!({"seq": value}),
        );
        sink.write(obs).await;
    }

    let tail = hot.tail_log("ws:option_trades", &scope, 10).await.unwrap();
    assert_eq!(tail.len(), 5);
    assert_eq!(tail[0].payload, json!({"seq": 7}));
    assert_eq!(tail[4].payload, json!({"seq": 3}));
}

#[tokio::test]
async fn archive_retry_recovers_from_one_failure() {
    let (sink, archive, _) = sink_with_stores();
    archive.fail_next_upserts(1);

    let obs = Observation::new(
        "ws:price",
        Scope::symbol("SPY"),
        CacheKind::BoundedLog,
        json!({"price": 450.0}),
    );
    assert_eq!(sink.write(obs).await, WriteResult::Inserted);
    assert_eq!(archive.row_count(), 1);
    assert_eq!(sink.stats().archive_failures, 0);
}

#[tokio::test]
async fn archive_failure_after_retry_is_isolated() {
    let (sink, archive, hot) = sink_with_stores();
    archive.fail_next_upserts(2);

    let failed = Observation::new(
        "ws:price",
        Scope::symbol("SPY"),
        CacheKind::BoundedLog,
        json!({"price": 450.0}),
    );
    assert_eq!(sink.write(failed).await, WriteResult::ArchiveFailed);
    assert_eq!(sink.stats().archive_failures, 1);

    // The hot cache write still happened
    let tail = hot
        .tail_log("ws:price", &Scope::symbol("SPY"), 10)
        .await
        .unwrap();
    assert_eq!(tail.len(), 1);

    // The pipeline continues: the next record lands normally
    let next = Observation::new(
        "ws:price",
        Scope::symbol("SPY"),
        CacheKind::BoundedLog,
        json!({"price": 451.0}),
    );
    assert_eq!(sink.write(next).await, WriteResult::Inserted);
    assert_eq!(archive.row_count(), 1);
}

#[tokio::test]
async fn hot_cache_views_do_not_touch_the_archive() {
    let (sink, archive, hot) = sink_with_stores();

    sink.write_view(
        "greek_exposure",
        &Scope::symbol("SPY"),
        &json!({"gamma": 2.0}),
        chrono::Utc::now(),
    )
    .await;

    assert_eq!(archive.row_count(), 0);
    let snapshot = hot
        .get_snapshot("greek_exposure", &Scope::symbol("SPY"))
        .await
        .unwrap();
    assert!(snapshot.is_some());
}
