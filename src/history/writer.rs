// Dedicated history writer: the aggregator hands records over a bounded channel and this
// task batches them into the store. A batch that keeps failing is dropped and counted.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;

use super::HistoryStore;
use crate::error::MonitorError;
use crate::models::HistoryRecord;
use crate::stats::Stats;

#[derive(Debug, Clone)]
pub struct HistoryWriterConfig {
    /// Flush once this many records are buffered.
    pub flush_rate: usize,
    pub flush_interval: Duration,
    pub retry_attempts: u32,
    /// Wait before the first retry; doubled for each further one.
    pub retry_backoff: Duration,
}

impl Default for HistoryWriterConfig {
    fn default() -> Self {
        Self {
            flush_rate: 10,
            flush_interval: Duration::from_secs(5),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

/// Channel capacity between aggregator and writer (backpressure if the writer falls behind).
pub fn channel_capacity(flush_rate: usize) -> usize {
    (flush_rate * 2).max(32)
}

/// Flushes when the buffer reaches `flush_rate`, every `flush_interval`, and once more
/// when the channel closes.
pub fn spawn(
    mut rx: mpsc::Receiver<HistoryRecord>,
    store: Arc<HistoryStore>,
    config: HistoryWriterConfig,
    stats: Arc<Stats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer: Vec<HistoryRecord> = Vec::with_capacity(config.flush_rate);
        let mut flush_tick = interval(config.flush_interval);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Some(record) => {
                            buffer.push(record);
                            if buffer.len() >= config.flush_rate {
                                flush(&store, &config, &mut buffer, &stats).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    flush(&store, &config, &mut buffer, &stats).await;
                }
            }
        }
        flush(&store, &config, &mut buffer, &stats).await;
        tracing::debug!("history writer shutting down");
    })
}

/// Save `buffer`, retrying with doubling backoff. The buffer is empty afterwards either way.
pub(crate) async fn flush(
    store: &HistoryStore,
    config: &HistoryWriterConfig,
    buffer: &mut Vec<HistoryRecord>,
    stats: &Stats,
) {
    if buffer.is_empty() {
        return;
    }
    let n = buffer.len();
    let attempts = config.retry_attempts.max(1);
    let mut backoff = config.retry_backoff;
    let mut last_error = None;

    for attempt in 1..=attempts {
        match store.save_records(buffer).await {
            Ok(()) => {
                stats.history_saved.fetch_add(n as u64, Ordering::Relaxed);
                buffer.clear();
                tracing::debug!(
                    operation = "save_records",
                    records_count = n,
                    attempt,
                    "history records saved"
                );
                return;
            }
            Err(e) => {
                tracing::debug!(error = %e, attempt, "history write attempt failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    stats.history_dropped.fetch_add(n as u64, Ordering::Relaxed);
    buffer.clear();
    let err = MonitorError::StorageWriteFailure {
        records: n,
        attempts,
        reason: last_error.map(|e| format!("{:#}", e)).unwrap_or_default(),
    };
    tracing::warn!(error = %err, operation = "save_records", "history batch dropped");
}
