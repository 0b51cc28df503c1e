// Broadcast hub: viewer registry, per-viewer bounded fan-out, heartbeat eviction.
//
// publish() never waits on a viewer: it only touches each viewer's own queue under a
// short lock. Network delivery happens in the viewer's task (see routes/ws.rs).

mod viewer;

pub use viewer::{ALL_TOPICS, ConnectionId, Viewer, ViewerHandle, ViewerState};

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::MonitorError;
use crate::models::{HubEvent, SystemSnapshot, Update};
use crate::stats::Stats;
use viewer::{LiveViewers, Offer, ViewerSlot};

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub queue_depth: usize,
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered heartbeats before eviction.
    pub missed_heartbeats: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_depth: 32,
            heartbeat_interval: Duration::from_secs(15),
            missed_heartbeats: 3,
        }
    }
}

pub struct BroadcastHub {
    config: HubConfig,
    viewers: RwLock<HashMap<ConnectionId, Arc<ViewerSlot>>>,
    next_id: AtomicU64,
    live: Arc<LiveViewers>,
    stats: Arc<Stats>,
}

impl BroadcastHub {
    pub fn new(config: HubConfig, stats: Arc<Stats>) -> Self {
        Self {
            config,
            viewers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            live: Arc::new(LiveViewers::default()),
            stats,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ConnectionId, Arc<ViewerSlot>>> {
        self.viewers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ConnectionId, Arc<ViewerSlot>>> {
        self.viewers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// New viewer in Connecting state. It already receives publishes; call
    /// `activate` once the connection is established.
    pub fn register<I, S>(&self, topics: I) -> ViewerHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let topics: BTreeSet<String> = topics.into_iter().map(Into::into).collect();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(connection_id = id, topics = ?topics, "viewer registered");
        let slot = Arc::new(ViewerSlot::new(id, topics, self.config.queue_depth));
        self.write().insert(id, slot.clone());
        ViewerHandle::new(slot, self.live.clone())
    }

    pub fn activate(&self, id: ConnectionId) -> bool {
        self.read().get(&id).is_some_and(|slot| slot.activate())
    }

    /// Graceful close: the viewer drains what is queued, then closes.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let Some(slot) = self.write().remove(&id) else {
            return false;
        };
        slot.drain();
        debug!(connection_id = id, "viewer unregistered");
        true
    }

    /// Fan out one merged generation. Returns how many viewers got a new event.
    pub fn publish(&self, generation: u64, changed: &[String], snapshot: &SystemSnapshot) -> usize {
        let viewers = self.read();
        let mut queued = 0;
        for slot in viewers.values() {
            if !slot.wants_any(changed) {
                continue;
            }
            let offer = slot.offer(generation, || {
                HubEvent::Update(Update {
                    generation,
                    changed: changed
                        .iter()
                        .filter(|id| slot.wants(id.as_str()))
                        .cloned()
                        .collect(),
                    diff: snapshot.diff(changed, |id| slot.wants(id)),
                })
            });
            match offer {
                Offer::Queued => queued += 1,
                Offer::Overflowed => {
                    queued += 1;
                    self.stats.viewer_overflows.fetch_add(1, Ordering::Relaxed);
                    let err = MonitorError::ViewerOverflow {
                        connection_id: slot.id(),
                        depth: self.config.queue_depth,
                    };
                    warn!(error = %err, generation, "viewer lagging");
                }
                Offer::Duplicate | Offer::Closed => {}
            }
        }
        queued
    }

    /// One heartbeat round: queue a heartbeat for every live viewer and evict the ones
    /// that left `missed_heartbeats` in a row unanswered. Returns the evicted ids.
    pub fn heartbeat(&self) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        for slot in self.read().values() {
            if let Some(missed) = slot.heartbeat(self.config.missed_heartbeats) {
                let err = MonitorError::ViewerDead {
                    connection_id: slot.id(),
                    missed,
                };
                warn!(error = %err, "evicting viewer");
                evicted.push(slot.id());
            }
        }
        if !evicted.is_empty() {
            let mut viewers = self.write();
            for id in &evicted {
                viewers.remove(id);
            }
            self.stats.viewers_evicted.fetch_add(evicted.len() as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Record a heartbeat answer (or any client activity) for `id`.
    pub fn ack(&self, id: ConnectionId) {
        if let Some(slot) = self.read().get(&id) {
            slot.ack();
        }
    }

    pub fn viewer(&self, id: ConnectionId) -> Option<Viewer> {
        self.read().get(&id).map(|slot| slot.info())
    }

    pub fn viewer_count(&self) -> usize {
        self.read().len()
    }

    /// Shutdown: every viewer drains and closes. Returns how many were open.
    pub fn close_all(&self) -> usize {
        let slots: Vec<Arc<ViewerSlot>> = self.write().drain().map(|(_, slot)| slot).collect();
        for slot in &slots {
            slot.drain();
        }
        if !slots.is_empty() {
            info!(viewers = slots.len(), "closing all viewers");
        }
        slots.len()
    }

    /// Viewer handles not yet dropped, including closed viewers whose task is still
    /// finishing.
    pub fn live_handles(&self) -> usize {
        self.live.count()
    }

    /// Resolves once every viewer handle has been dropped, i.e. every delivery task has
    /// drained its queue and finished. Pair with `close_all` on shutdown.
    pub async fn wait_closed(&self) {
        self.live.wait_idle().await;
    }
}

/// Runs `heartbeat()` every `heartbeat_interval` until shutdown.
pub fn spawn_heartbeat(
    hub: Arc<BroadcastHub>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let period = hub.config.heartbeat_interval;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let evicted = hub.heartbeat();
                    if !evicted.is_empty() {
                        debug!(evicted = evicted.len(), viewers = hub.viewer_count(), "heartbeat round");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("heartbeat task shutting down");
    })
}
