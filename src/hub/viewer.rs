// Per-viewer outbound queue and lifecycle.
//
// Lifecycle: Connecting -> Active -> (Draining | Evicted) -> Closed.
// The queue holds at most `depth` updates; overflow drops the oldest and leaves one
// coalesced resync marker, delivered before the remaining (newer) updates.

use serde::Serialize;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use crate::models::HubEvent;

pub type ConnectionId = u64;

/// Subscribes to every source.
pub const ALL_TOPICS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewerState {
    Connecting,
    Active,
    /// Graceful close: no new events, queued ones still delivered.
    Draining,
    /// Heartbeat failure: queue discarded.
    Evicted,
    Closed,
}

impl ViewerState {
    /// Still accepting new events.
    pub fn is_open(self) -> bool {
        matches!(self, ViewerState::Connecting | ViewerState::Active)
    }

    fn can_become(self, next: ViewerState) -> bool {
        use ViewerState::*;
        matches!(
            (self, next),
            (Connecting, Active)
                | (Connecting | Active, Draining)
                | (Connecting | Active, Evicted)
                | (Draining | Evicted, Closed)
        )
    }
}

/// Read-only view of a registered viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewer {
    pub connection_id: ConnectionId,
    pub subscribed_topics: BTreeSet<String>,
    pub last_delivered_generation: u64,
    pub state: ViewerState,
}

pub(crate) enum Offer {
    Queued,
    /// Queued, and the backlog head was dropped for a new resync marker.
    Overflowed,
    Duplicate,
    Closed,
}

enum Next {
    Event(HubEvent),
    Empty,
    Closed,
}

struct Outbox {
    state: ViewerState,
    events: VecDeque<HubEvent>,
    /// Newest generation dropped on overflow, pending delivery as a resync marker.
    resync: Option<u64>,
    heartbeat_pending: bool,
    last_enqueued_generation: u64,
    last_delivered_generation: u64,
    acked: bool,
    missed_heartbeats: u32,
}

impl Outbox {
    fn transition(&mut self, next: ViewerState) -> bool {
        if self.state.can_become(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

pub(crate) struct ViewerSlot {
    id: ConnectionId,
    topics: BTreeSet<String>,
    depth: usize,
    outbox: Mutex<Outbox>,
    notify: Notify,
}

impl ViewerSlot {
    pub(crate) fn new(id: ConnectionId, topics: BTreeSet<String>, depth: usize) -> Self {
        Self {
            id,
            topics,
            depth: depth.max(1),
            outbox: Mutex::new(Outbox {
                state: ViewerState::Connecting,
                events: VecDeque::with_capacity(depth.max(1)),
                resync: None,
                heartbeat_pending: false,
                last_enqueued_generation: 0,
                last_delivered_generation: 0,
                acked: true,
                missed_heartbeats: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn wants(&self, source_id: &str) -> bool {
        self.topics.contains(ALL_TOPICS) || self.topics.contains(source_id)
    }

    pub(crate) fn wants_any(&self, changed: &[String]) -> bool {
        changed.iter().any(|id| self.wants(id))
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue the update for `generation`, built lazily so duplicates cost nothing.
    pub(crate) fn offer(&self, generation: u64, build: impl FnOnce() -> HubEvent) -> Offer {
        let mut outbox = self.outbox();
        if !outbox.state.is_open() {
            return Offer::Closed;
        }
        if generation <= outbox.last_enqueued_generation {
            return Offer::Duplicate;
        }
        outbox.last_enqueued_generation = generation;

        let mut offer = Offer::Queued;
        if outbox.events.len() >= self.depth {
            let dropped = outbox
                .events
                .pop_front()
                .and_then(|e| e.generation())
                .unwrap_or(generation);
            if outbox.resync.is_none() {
                offer = Offer::Overflowed;
            }
            outbox.resync = Some(outbox.resync.map_or(dropped, |g| g.max(dropped)));
        }
        outbox.events.push_back(build());
        drop(outbox);
        self.notify.notify_one();
        offer
    }

    /// One heartbeat tick. Returns the missed count when the viewer must be evicted.
    pub(crate) fn heartbeat(&self, max_missed: u32) -> Option<u32> {
        let mut outbox = self.outbox();
        if !outbox.state.is_open() {
            return None;
        }
        if outbox.acked {
            outbox.missed_heartbeats = 0;
        } else {
            outbox.missed_heartbeats += 1;
        }
        outbox.acked = false;

        if outbox.missed_heartbeats >= max_missed {
            outbox.transition(ViewerState::Evicted);
            outbox.events.clear();
            outbox.resync = None;
            outbox.heartbeat_pending = false;
            let missed = outbox.missed_heartbeats;
            drop(outbox);
            self.notify.notify_one();
            return Some(missed);
        }
        outbox.heartbeat_pending = true;
        drop(outbox);
        self.notify.notify_one();
        None
    }

    pub(crate) fn ack(&self) {
        let mut outbox = self.outbox();
        outbox.acked = true;
        outbox.missed_heartbeats = 0;
    }

    pub(crate) fn activate(&self) -> bool {
        self.outbox().transition(ViewerState::Active)
    }

    pub(crate) fn drain(&self) -> bool {
        let changed = self.outbox().transition(ViewerState::Draining);
        if changed {
            self.notify.notify_one();
        }
        changed
    }

    pub(crate) fn info(&self) -> Viewer {
        let outbox = self.outbox();
        Viewer {
            connection_id: self.id,
            subscribed_topics: self.topics.clone(),
            last_delivered_generation: outbox.last_delivered_generation,
            state: outbox.state,
        }
    }

    fn state(&self) -> ViewerState {
        self.outbox().state
    }

    fn next(&self) -> Next {
        let mut outbox = self.outbox();
        if outbox.state == ViewerState::Evicted {
            outbox.transition(ViewerState::Closed);
            return Next::Closed;
        }
        if outbox.heartbeat_pending {
            outbox.heartbeat_pending = false;
            return Next::Event(HubEvent::Heartbeat);
        }
        if let Some(generation) = outbox.resync.take() {
            return Next::Event(HubEvent::Resync { generation });
        }
        if let Some(event) = outbox.events.pop_front() {
            if let HubEvent::Update(update) = &event {
                outbox.last_delivered_generation = update.generation;
            }
            return Next::Event(event);
        }
        match outbox.state {
            ViewerState::Draining => {
                outbox.transition(ViewerState::Closed);
                Next::Closed
            }
            ViewerState::Closed => Next::Closed,
            _ => Next::Empty,
        }
    }
}

/// Count of viewer handles still held by delivery tasks.
#[derive(Default)]
pub(crate) struct LiveViewers {
    count: AtomicUsize,
    idle: Notify,
}

impl LiveViewers {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolves once no handle is left.
    pub(crate) async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Consumer side of a viewer, owned by its delivery task.
pub struct ViewerHandle {
    slot: Arc<ViewerSlot>,
    live: Arc<LiveViewers>,
}

impl ViewerHandle {
    pub(crate) fn new(slot: Arc<ViewerSlot>, live: Arc<LiveViewers>) -> Self {
        live.count.fetch_add(1, Ordering::AcqRel);
        Self { slot, live }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.slot.id
    }

    pub fn state(&self) -> ViewerState {
        self.slot.state()
    }

    pub fn info(&self) -> Viewer {
        self.slot.info()
    }

    /// Answer the last heartbeat.
    pub fn ack(&self) {
        self.slot.ack();
    }

    /// Next queued event without waiting. None when nothing is queued or the viewer is closed.
    pub fn try_recv(&self) -> Option<HubEvent> {
        match self.slot.next() {
            Next::Event(event) => Some(event),
            Next::Empty | Next::Closed => None,
        }
    }

    /// Next event; None once the viewer is drained or evicted (state is then Closed).
    pub async fn recv(&self) -> Option<HubEvent> {
        loop {
            match self.slot.next() {
                Next::Event(event) => return Some(event),
                Next::Closed => return None,
                Next::Empty => self.slot.notify.notified().await,
            }
        }
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        if self.live.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.live.idle.notify_waiters();
        }
    }
}
