// Single writer of the SystemSnapshot. Samplers reach it only through the ingress channel;
// readers get cloned snapshots from a `watch` channel, never the live map.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::MonitorError;
use crate::hub::BroadcastHub;
use crate::models::{HistoryRecord, Sample, SystemSnapshot};
use crate::stats::Stats;

pub struct Aggregator {
    snapshot: SystemSnapshot,
    snapshot_tx: watch::Sender<Arc<SystemSnapshot>>,
    hub: Arc<BroadcastHub>,
    history_tx: Option<mpsc::Sender<HistoryRecord>>,
    stats: Arc<Stats>,
}

impl Aggregator {
    pub fn new(hub: Arc<BroadcastHub>, stats: Arc<Stats>) -> Self {
        let (snapshot_tx, _) = watch::channel(Arc::new(SystemSnapshot::default()));
        Self {
            snapshot: SystemSnapshot::default(),
            snapshot_tx,
            hub,
            history_tx: None,
            stats,
        }
    }

    /// Hand qualifying merged samples to the history writer.
    pub fn with_history(mut self, history_tx: mpsc::Sender<HistoryRecord>) -> Self {
        self.history_tx = Some(history_tx);
        self
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.snapshot_tx.subscribe(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }

    /// Merge one sample. Returns false when it is not newer than the stored sample for
    /// its source; equal timestamps keep the first arrival.
    pub fn ingest(&mut self, sample: Sample) -> bool {
        if let Some(stored) = self.snapshot.sources.get(&sample.source_id)
            && sample.timestamp <= stored.timestamp
        {
            self.stats.stale_dropped.fetch_add(1, Ordering::Relaxed);
            let err = MonitorError::StaleSample {
                source_id: sample.source_id.clone(),
                timestamp: sample.timestamp,
                stored: stored.timestamp,
            };
            debug!(error = %err, operation = "ingest", "sample dropped");
            return false;
        }

        if let Some(tx) = &self.history_tx
            && let Some(record) = HistoryRecord::from_sample(&sample)
            && let Err(e) = tx.try_send(record)
        {
            self.stats.history_dropped.fetch_add(1, Ordering::Relaxed);
            debug!(error = %e, source_id = %sample.source_id, "history queue full, record dropped");
        }

        let source_id = sample.source_id.clone();
        self.snapshot
            .sources
            .insert(source_id.clone(), Arc::new(sample));
        self.snapshot.generation += 1;
        let generation = self.snapshot.generation;

        let published = Arc::new(self.snapshot.clone());
        self.snapshot_tx.send_replace(published.clone());
        self.hub
            .publish(generation, std::slice::from_ref(&source_id), &published);
        self.stats.samples_ingested.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Drain `ingress` until every sender is gone. Dropping the aggregator afterwards closes
/// the history channel, which lets the writer flush and exit.
pub fn spawn(mut aggregator: Aggregator, mut ingress: mpsc::Receiver<Sample>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(sample) = ingress.recv().await {
            aggregator.ingest(sample);
        }
        debug!(
            generation = aggregator.generation(),
            "aggregator shutting down"
        );
    })
}

/// Point-in-time reads of the aggregated snapshot.
#[derive(Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Arc<SystemSnapshot>>,
}

impl SnapshotReader {
    pub fn get(&self) -> SystemSnapshot {
        self.rx.borrow().as_ref().clone()
    }

    pub fn generation(&self) -> u64 {
        self.rx.borrow().generation
    }
}
