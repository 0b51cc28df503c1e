// Broadcast hub tests: fan-out, overflow coalescing, idempotence, heartbeats, lifecycle

mod common;

use common::numeric_sample;
use homewatch::hub::{BroadcastHub, HubConfig, ViewerState};
use homewatch::models::{HubEvent, SystemSnapshot};
use homewatch::stats::Stats;
use std::sync::Arc;
use std::time::Duration;

fn hub_with(queue_depth: usize, missed_heartbeats: u32) -> (Arc<BroadcastHub>, Arc<Stats>) {
    let stats = Arc::new(Stats::default());
    let hub = Arc::new(BroadcastHub::new(
        HubConfig {
            queue_depth,
            heartbeat_interval: Duration::from_secs(15),
            missed_heartbeats,
        },
        stats.clone(),
    ));
    (hub, stats)
}

fn snapshot_with(source_id: &str, generation: u64) -> SystemSnapshot {
    let mut snapshot = SystemSnapshot {
        generation,
        ..Default::default()
    };
    snapshot.sources.insert(
        source_id.to_string(),
        Arc::new(numeric_sample(
            source_id,
            generation,
            &[("v", generation as f64)],
        )),
    );
    snapshot
}

fn publish(hub: &BroadcastHub, source_id: &str, generation: u64) -> usize {
    let snapshot = snapshot_with(source_id, generation);
    hub.publish(generation, &[source_id.to_string()], &snapshot)
}

#[test]
fn stalled_viewer_gets_bounded_queue_and_one_resync() {
    let (hub, stats) = hub_with(32, 3);
    let stalled = hub.register(["host"]);
    let healthy = hub.register(["host"]);
    hub.activate(stalled.connection_id());
    hub.activate(healthy.connection_id());

    let mut healthy_generations = Vec::new();
    for generation in 1..=40 {
        publish(&hub, "host", generation);
        while let Some(event) = healthy.try_recv() {
            healthy_generations.extend(event.generation());
        }
    }
    assert_eq!(healthy_generations, (1..=40).collect::<Vec<_>>());

    let events: Vec<HubEvent> = std::iter::from_fn(|| stalled.try_recv()).collect();
    let resyncs = events
        .iter()
        .filter(|e| matches!(e, HubEvent::Resync { .. }))
        .count();
    let updates: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            HubEvent::Update(u) => Some(u.generation),
            _ => None,
        })
        .collect();
    assert_eq!(resyncs, 1);
    assert!(updates.len() <= 32);
    assert_eq!(updates.last(), Some(&40));
    assert!(matches!(events[0], HubEvent::Resync { generation: 8 }));
    assert_eq!(stats.snapshot().viewer_overflows, 1);
}

#[test]
fn publishing_same_generation_twice_delivers_once() {
    let (hub, _stats) = hub_with(32, 3);
    let viewer = hub.register(["*"]);
    assert_eq!(publish(&hub, "host", 7), 1);
    assert_eq!(publish(&hub, "host", 7), 0);
    assert_eq!(publish(&hub, "host", 6), 0);
    assert_eq!(viewer.try_recv().and_then(|e| e.generation()), Some(7));
    assert!(viewer.try_recv().is_none());
}

#[test]
fn publish_respects_topics() {
    let (hub, _stats) = hub_with(32, 3);
    let host = hub.register(["host"]);
    let logs = hub.register(["logs:app", "ports"]);
    assert_eq!(publish(&hub, "host", 1), 1);
    assert!(host.try_recv().is_some());
    assert!(logs.try_recv().is_none());
}

#[test]
fn missed_heartbeats_evict_viewer() {
    let (hub, stats) = hub_with(32, 3);
    let viewer = hub.register(["*"]);
    hub.activate(viewer.connection_id());
    assert_eq!(hub.viewer_count(), 1);

    for _ in 0..3 {
        assert!(hub.heartbeat().is_empty());
    }
    let evicted = hub.heartbeat();
    assert_eq!(evicted, vec![viewer.connection_id()]);
    assert_eq!(hub.viewer_count(), 0);
    assert_eq!(viewer.state(), ViewerState::Evicted);
    assert!(viewer.try_recv().is_none());
    assert_eq!(viewer.state(), ViewerState::Closed);
    assert_eq!(stats.snapshot().viewers_evicted, 1);
}

#[test]
fn acknowledged_heartbeats_keep_viewer_alive() {
    let (hub, _stats) = hub_with(32, 3);
    let viewer = hub.register(["*"]);
    hub.activate(viewer.connection_id());

    for _ in 0..10 {
        assert!(hub.heartbeat().is_empty());
        assert!(matches!(viewer.try_recv(), Some(HubEvent::Heartbeat)));
        viewer.ack();
    }
    assert_eq!(hub.viewer_count(), 1);
    assert_eq!(viewer.state(), ViewerState::Active);
}

#[test]
fn unregister_drains_queued_events_then_closes() {
    let (hub, _stats) = hub_with(32, 3);
    let viewer = hub.register(["host"]);
    hub.activate(viewer.connection_id());
    publish(&hub, "host", 1);
    publish(&hub, "host", 2);

    assert!(hub.unregister(viewer.connection_id()));
    assert!(!hub.unregister(viewer.connection_id()));
    assert_eq!(viewer.state(), ViewerState::Draining);
    assert_eq!(hub.viewer_count(), 0);

    assert_eq!(viewer.try_recv().and_then(|e| e.generation()), Some(1));
    assert_eq!(viewer.try_recv().and_then(|e| e.generation()), Some(2));
    assert!(viewer.try_recv().is_none());
    assert_eq!(viewer.state(), ViewerState::Closed);
    assert_eq!(viewer.info().last_delivered_generation, 2);
}

#[test]
fn viewer_lifecycle_starts_connecting() {
    let (hub, _stats) = hub_with(32, 3);
    let viewer = hub.register(["host", "ports"]);
    let info = hub.viewer(viewer.connection_id()).unwrap();
    assert_eq!(info.state, ViewerState::Connecting);
    assert_eq!(info.subscribed_topics.len(), 2);
    assert!(hub.activate(viewer.connection_id()));
    assert!(!hub.activate(viewer.connection_id()));
    assert_eq!(viewer.state(), ViewerState::Active);
}

#[tokio::test]
async fn close_all_ends_pending_receivers() {
    let (hub, _stats) = hub_with(32, 3);
    let a = hub.register(["*"]);
    let b = hub.register(["*"]);
    let waiter = tokio::spawn(async move { a.recv().await });

    tokio::task::yield_now().await;
    assert_eq!(hub.close_all(), 2);
    assert_eq!(hub.viewer_count(), 0);
    assert!(waiter.await.unwrap().is_none());
    assert!(b.recv().await.is_none());
    assert_eq!(b.state(), ViewerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_task_evicts_silent_viewer() {
    let (hub, _stats) = hub_with(32, 3);
    let viewer = hub.register(["*"]);
    hub.activate(viewer.connection_id());
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = homewatch::hub::spawn_heartbeat(hub.clone(), shutdown_rx);

    let mut heartbeats = 0;
    while viewer.recv().await.is_some() {
        heartbeats += 1;
    }
    assert_eq!(heartbeats, 3);
    assert_eq!(hub.viewer_count(), 0);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn wait_closed_resolves_after_viewers_drain_their_queues() {
    let (hub, _stats) = hub_with(32, 3);
    let viewer = hub.register(["*"]);
    hub.activate(viewer.connection_id());
    for generation in 1..=5 {
        publish(&hub, "a", generation);
    }
    assert_eq!(hub.live_handles(), 1);

    // Slow delivery task: one event per 100ms.
    let (delivered_tx, mut delivered_rx) = tokio::sync::mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        while let Some(event) = viewer.recv().await {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = delivered_tx.send(event.generation());
        }
    });

    assert_eq!(hub.close_all(), 1);
    let started = tokio::time::Instant::now();
    tokio::time::timeout(Duration::from_secs(5), hub.wait_closed())
        .await
        .expect("viewer task should finish draining");
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(hub.live_handles(), 0);

    let mut delivered = Vec::new();
    while let Ok(generation) = delivered_rx.try_recv() {
        delivered.push(generation);
    }
    assert_eq!(delivered, (1..=5).map(Some).collect::<Vec<_>>());
    task.await.unwrap();
}

#[tokio::test]
async fn wait_closed_returns_immediately_without_viewers() {
    let (hub, _stats) = hub_with(32, 3);
    {
        let _viewer = hub.register(["*"]);
        assert_eq!(hub.live_handles(), 1);
    }
    assert_eq!(hub.live_handles(), 0);
    tokio::time::timeout(Duration::from_millis(100), hub.wait_closed())
        .await
        .unwrap();
}
