// The monitoring core as the gateway sees it: snapshot reads, viewer subscriptions,
// history queries and counters.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::aggregator::SnapshotReader;
use crate::history::HistoryStore;
use crate::hub::{BroadcastHub, ViewerHandle};
use crate::models::{HistoryRecord, SystemSnapshot};
use crate::stats::{Stats, StatsSnapshot};

#[derive(Clone)]
pub struct Monitor {
    snapshots: SnapshotReader,
    hub: Arc<BroadcastHub>,
    history: Arc<HistoryStore>,
    stats: Arc<Stats>,
}

impl Monitor {
    pub fn new(
        snapshots: SnapshotReader,
        hub: Arc<BroadcastHub>,
        history: Arc<HistoryStore>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            snapshots,
            hub,
            history,
            stats,
        }
    }

    /// Point-in-time copy of the aggregated state.
    pub fn get_snapshot(&self) -> SystemSnapshot {
        self.snapshots.get()
    }

    /// Register an active viewer for `topics` ("*" for every source).
    pub fn subscribe<I, S>(&self, topics: I) -> ViewerHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let handle = self.hub.register(topics);
        self.hub.activate(handle.connection_id());
        handle
    }

    pub async fn get_history(
        &self,
        source_id: &str,
        from_ts: u64,
        to_ts: u64,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        self.history.query(source_id, from_ts, to_ts).await
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Logs counters every `interval` until shutdown.
    pub fn spawn_stats_logger(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let s = monitor.stats();
                        tracing::info!(
                            generation = monitor.snapshots.generation(),
                            viewers = monitor.hub.viewer_count(),
                            samples_ingested = s.samples_ingested,
                            stale_dropped = s.stale_dropped,
                            history_saved = s.history_saved,
                            history_dropped = s.history_dropped,
                            history_pruned = s.history_pruned,
                            viewer_overflows = s.viewer_overflows,
                            viewers_evicted = s.viewers_evicted,
                            "app stats"
                        );
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.snapshots.generation()
    }
}
