// TCP port scan of a configured port list. A port is open when a connect succeeds
// within the per-port timeout; probes run concurrently.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use std::time::Duration;
use tokio::net::TcpStream;

use super::Provider;
use crate::models::Payload;

pub const SOURCE_ID: &str = "ports";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortState {
    pub port: u16,
    pub open: bool,
}

pub struct PortScanProvider {
    host: String,
    ports: Vec<u16>,
    timeout: Duration,
}

impl PortScanProvider {
    pub fn new(host: impl Into<String>, ports: Vec<u16>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            ports,
            timeout,
        }
    }

    async fn probe(&self, port: u16) -> PortState {
        let connect = TcpStream::connect((self.host.as_str(), port));
        let open = matches!(tokio::time::timeout(self.timeout, connect).await, Ok(Ok(_)));
        PortState { port, open }
    }

    async fn scan(&self) -> anyhow::Result<Payload> {
        let states = join_all(self.ports.iter().map(|&port| self.probe(port))).await;
        let open_count = states.iter().filter(|s| s.open).count();

        let mut payload = Payload::new();
        payload.insert("open_count".into(), open_count.into());
        payload.insert("closed_count".into(), (states.len() - open_count).into());
        payload.insert("ports".into(), serde_json::to_value(&states)?);
        Ok(payload)
    }
}

impl Provider for PortScanProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>> {
        self.scan().boxed()
    }
}
