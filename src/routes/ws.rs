// WebSocket viewer: welcome snapshot, then hub events until the viewer closes or is evicted.

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::hub::{ALL_TOPICS, BroadcastHub, ConnectionId, ViewerHandle};
use crate::models::{HubEvent, SystemSnapshot};
use crate::monitor::Monitor;

pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Text frame a client sends to get a fresh full snapshot.
const RESYNC_REQUEST: &str = "resync";

#[derive(Debug, Deserialize)]
pub(super) struct WsParams {
    topics: Option<String>,
}

/// Comma-separated topics; empty or missing means every source.
fn parse_topics(raw: Option<&str>) -> Vec<String> {
    let topics: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect();
    if topics.is_empty() {
        vec![ALL_TOPICS.to_string()]
    } else {
        topics
    }
}

/// Unregisters the viewer when the connection task ends, however it ends.
struct ViewerGuard {
    hub: Arc<BroadcastHub>,
    id: ConnectionId,
}

impl Drop for ViewerGuard {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}

pub(super) async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let topics = parse_topics(params.topics.as_deref());
    let monitor = state.monitor.clone();
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = stream_viewer(socket, monitor, topics).await {
            tracing::info!("viewer stream error: {}", e);
        }
    })
}

/// Send with a timeout; false when the peer is gone or too slow.
async fn send(socket: &mut WebSocket, msg: Message) -> bool {
    matches!(timeout(WS_SEND_TIMEOUT, socket.send(msg)).await, Ok(Ok(())))
}

fn snapshot_message(snapshot: &SystemSnapshot) -> anyhow::Result<Message> {
    let json = serde_json::to_string(&serde_json::json!({
        "type": "snapshot",
        "snapshot": snapshot,
    }))?;
    Ok(Message::Text(json.into()))
}

async fn stream_viewer(
    mut socket: WebSocket,
    monitor: Monitor,
    topics: Vec<String>,
) -> anyhow::Result<()> {
    let hub = monitor.hub().clone();
    // Registered before the welcome snapshot so no update falls between the two; updates at
    // or below the snapshot's generation may arrive once more and can be ignored.
    let viewer: ViewerHandle = hub.register(topics);
    let id = viewer.connection_id();
    let _guard = ViewerGuard {
        hub: hub.clone(),
        id,
    };
    tracing::info!(connection_id = id, "viewer connected");

    if !send(&mut socket, snapshot_message(&monitor.get_snapshot())?).await {
        return Ok(());
    }
    hub.activate(id);

    loop {
        tokio::select! {
            event = viewer.recv() => {
                let Some(event) = event else {
                    // drained or evicted
                    let _ = send(&mut socket, Message::Close(None)).await;
                    break;
                };
                let ok = match &event {
                    HubEvent::Heartbeat => send(&mut socket, Message::Ping(Bytes::new())).await,
                    HubEvent::Resync { .. } => {
                        let json = serde_json::to_string(&event)?;
                        send(&mut socket, Message::Text(json.into())).await
                            && send(&mut socket, snapshot_message(&monitor.get_snapshot())?).await
                    }
                    HubEvent::Update(_) => {
                        let json = serde_json::to_string(&event)?;
                        send(&mut socket, Message::Text(json.into())).await
                    }
                };
                if !ok {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Text(text))) => {
                        viewer.ack();
                        if text.as_str().trim() == RESYNC_REQUEST
                            && !send(&mut socket, snapshot_message(&monitor.get_snapshot())?).await
                        {
                            break;
                        }
                    }
                    Some(Ok(_)) => viewer.ack(),
                    Some(Err(e)) => {
                        tracing::debug!(connection_id = id, error = %e, "viewer socket error");
                        break;
                    }
                }
            }
        }
    }
    tracing::info!(connection_id = id, "viewer disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_topics_defaults_to_all() {
        assert_eq!(parse_topics(None), vec!["*"]);
        assert_eq!(parse_topics(Some(" , ")), vec!["*"]);
    }

    #[test]
    fn parse_topics_splits_and_trims() {
        assert_eq!(
            parse_topics(Some("host, containers,,logs:app")),
            vec!["host", "containers", "logs:app"]
        );
    }
}
