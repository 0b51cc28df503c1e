// History store tests: record/query, retention sweep, writer batching and failure handling

mod common;

use common::{numeric_sample, temp_store};
use homewatch::history::HistoryStore;
use homewatch::history::retention::{self, next_vacuum_delay};
use homewatch::history::writer::{self, HistoryWriterConfig};
use homewatch::models::{HistoryRecord, Sample, SampleStatus};
use homewatch::stats::Stats;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn init_is_idempotent() {
    let (_dir, store) = temp_store(HOUR).await;
    store.init().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn record_then_query_returns_identical_values() {
    let (_dir, store) = temp_store(HOUR).await;
    let values = [
        ("cpu", 0.1 + 0.2),
        ("load", 1.0 / 3.0),
        ("tiny", f64::MIN_POSITIVE),
        ("huge", 1.7976931348623157e308),
        ("neg", -42.125),
    ];
    assert!(store.record(&numeric_sample("host", 1_000, &values)).await.unwrap());

    let records = store.query("host", 1_000, 1_000).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, 1_000);
    for (name, value) in values {
        assert_eq!(records[0].numeric_fields[name].to_bits(), value.to_bits());
    }
}

#[tokio::test]
async fn record_skips_samples_without_numbers() {
    let (_dir, store) = temp_store(HOUR).await;
    let failed = Sample::failed("host", 1, SampleStatus::Error, "boom");
    assert!(!store.record(&failed).await.unwrap());

    let mut text_only = numeric_sample("logs:app", 2, &[]);
    text_only
        .payload
        .insert("path".into(), serde_json::json!("/var/log/app.log"));
    assert!(!store.record(&text_only).await.unwrap());
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn query_is_inclusive_ordered_and_per_source() {
    let (_dir, store) = temp_store(HOUR).await;
    for ts in [3_000, 1_000, 5_000, 2_000, 4_000] {
        store
            .record(&numeric_sample("host", ts, &[("cpu", ts as f64)]))
            .await
            .unwrap();
    }
    store
        .record(&numeric_sample("ports", 3_000, &[("open_count", 2.0)]))
        .await
        .unwrap();

    let records = store.query("host", 2_000, 4_000).await.unwrap();
    let timestamps: Vec<u64> = records.iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![2_000, 3_000, 4_000]);
    assert!(records.iter().all(|r| r.source_id == "host"));
    assert!(store.query("host", 6_000, 9_000).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_timestamp_keeps_first_record() {
    let (_dir, store) = temp_store(HOUR).await;
    let first = HistoryRecord {
        source_id: "host".into(),
        timestamp: 10,
        numeric_fields: BTreeMap::from([("cpu".to_string(), 1.0)]),
    };
    let mut second = first.clone();
    second.numeric_fields.insert("cpu".into(), 2.0);
    store.save_records(&[first, second]).await.unwrap();

    let records = store.query("host", 0, 100).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].numeric_fields["cpu"], 1.0);
}

#[tokio::test]
async fn sweep_removes_only_records_past_retention() {
    let (_dir, store) = temp_store(HOUR).await;
    store
        .record(&numeric_sample("host", 0, &[("cpu", 1.0)]))
        .await
        .unwrap();
    store
        .record(&numeric_sample("host", 3_600_000, &[("cpu", 2.0)]))
        .await
        .unwrap();

    let deleted = store.sweep(3_601_000).await.unwrap();
    assert_eq!(deleted, 1);
    let remaining = store.query("host", 0, u64::MAX).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].timestamp, 3_600_000);
}

#[tokio::test]
async fn sweep_is_bounded_per_transaction() {
    let (_dir, store) = temp_store(HOUR).await;
    let store = store.with_sweep_batch_limit(3);
    let records: Vec<HistoryRecord> = (1..=5)
        .map(|ts| HistoryRecord {
            source_id: "host".into(),
            timestamp: ts,
            numeric_fields: BTreeMap::from([("cpu".to_string(), ts as f64)]),
        })
        .collect();
    store.save_records(&records).await.unwrap();

    let now = HOUR.as_millis() as u64 + 1_000;
    assert_eq!(store.sweep(now).await.unwrap(), 3);
    assert_eq!(store.query("host", 0, u64::MAX).await.unwrap()[0].timestamp, 4);
    assert_eq!(store.sweep(now).await.unwrap(), 2);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn sweep_once_counts_pruned_rows() {
    let (_dir, store) = temp_store(HOUR).await;
    store
        .record(&numeric_sample("host", 1, &[("cpu", 1.0)]))
        .await
        .unwrap();
    let stats = Stats::default();
    assert_eq!(retention::sweep_once(&store, &stats).await, 1);
    assert_eq!(stats.snapshot().history_pruned, 1);
}

#[tokio::test]
async fn failed_sweep_is_not_fatal_and_next_cycle_prunes() {
    let (dir, store) = temp_store(HOUR).await;
    store
        .record(&numeric_sample("host", 1, &[("cpu", 1.0)]))
        .await
        .unwrap();
    store.close().await;

    let stats = Stats::default();
    assert_eq!(retention::sweep_once(&store, &stats).await, 0);
    assert_eq!(stats.snapshot().history_pruned, 0);

    let path = dir.path().join("history.db");
    let reopened = HistoryStore::connect(path.to_str().unwrap(), 2, HOUR)
        .await
        .unwrap();
    assert_eq!(reopened.count().await.unwrap(), 1);
    assert_eq!(retention::sweep_once(&reopened, &stats).await, 1);
    assert_eq!(stats.snapshot().history_pruned, 1);
    assert_eq!(reopened.count().await.unwrap(), 0);
}

#[tokio::test]
async fn timestamps_beyond_i64_are_clamped_and_readable() {
    let (_dir, store) = temp_store(HOUR).await;
    store
        .record(&numeric_sample("host", u64::MAX, &[("cpu", 1.0)]))
        .await
        .unwrap();
    let records = store.query("host", 0, u64::MAX).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].timestamp, i64::MAX as u64);
    assert_eq!(store.sweep(u64::MAX).await.unwrap(), 0);
}

#[tokio::test]
async fn vacuum_runs_on_open_store() {
    let (_dir, store) = temp_store(HOUR).await;
    store.vacuum().await.unwrap();
}

#[tokio::test]
async fn writer_flushes_remaining_records_on_close() {
    let (_dir, store) = temp_store(HOUR).await;
    let store = Arc::new(store);
    let stats = Arc::new(Stats::default());
    let (tx, rx) = mpsc::channel(writer::channel_capacity(100));
    let handle = writer::spawn(
        rx,
        store.clone(),
        HistoryWriterConfig {
            flush_rate: 100,
            flush_interval: Duration::from_secs(3600),
            ..Default::default()
        },
        stats.clone(),
    );

    for ts in 1..=5 {
        let sample = numeric_sample("host", ts, &[("cpu", ts as f64)]);
        tx.send(HistoryRecord::from_sample(&sample).unwrap())
            .await
            .unwrap();
    }
    drop(tx);
    handle.await.unwrap();

    assert_eq!(store.count().await.unwrap(), 5);
    assert_eq!(stats.snapshot().history_saved, 5);
}

#[tokio::test]
async fn writer_drops_batch_after_retries_when_storage_fails() {
    let (_dir, store) = temp_store(HOUR).await;
    store.close().await;
    let store = Arc::new(store);
    let stats = Arc::new(Stats::default());
    let (tx, rx) = mpsc::channel(8);
    let handle = writer::spawn(
        rx,
        store,
        HistoryWriterConfig {
            flush_rate: 2,
            flush_interval: Duration::from_secs(3600),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(50),
        },
        stats.clone(),
    );
    let started = std::time::Instant::now();

    for ts in 1..=2 {
        let sample = numeric_sample("host", ts, &[("cpu", 1.0)]);
        tx.send(HistoryRecord::from_sample(&sample).unwrap())
            .await
            .unwrap();
    }
    drop(tx);
    handle.await.unwrap();

    // Three attempts: waits of 50ms then 100ms between them.
    assert!(started.elapsed() >= Duration::from_millis(150));
    let s = stats.snapshot();
    assert_eq!(s.history_dropped, 2);
    assert_eq!(s.history_saved, 0);
}

#[test]
fn vacuum_delay_uses_fixed_interval_without_schedule() {
    let now = chrono::Local::now();
    assert_eq!(
        next_vacuum_delay(None, Duration::from_secs(86_400), now),
        Duration::from_secs(86_400)
    );
}

#[test]
fn vacuum_delay_follows_cron_schedule() {
    let schedule = cron::Schedule::from_str("0 * * * * *").unwrap();
    let now = chrono::Local::now();
    let delay = next_vacuum_delay(Some(&schedule), Duration::from_secs(86_400), now);
    assert!(delay <= Duration::from_secs(60));
}
