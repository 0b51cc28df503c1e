// Named system service up/down state via `systemctl is-active`.

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, try_join_all};
use serde::Serialize;
use tokio::process::Command;

use super::Provider;
use crate::models::Payload;

pub const SOURCE_ID: &str = "services";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    pub name: String,
    pub active: bool,
    /// Raw `is-active` answer: active, inactive, failed, activating, unknown, ...
    pub state: String,
}

pub struct ServiceStatusProvider {
    binary: String,
    services: Vec<String>,
}

impl ServiceStatusProvider {
    pub fn new(binary: impl Into<String>, services: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            services,
        }
    }

    async fn query(&self, name: &str) -> anyhow::Result<ServiceState> {
        let output = Command::new(&self.binary)
            .args(["is-active", name])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("spawn {}: {}", self.binary, e))?;
        let state = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(ServiceState {
            name: name.to_string(),
            active: output.status.success() && state == "active",
            state: if state.is_empty() {
                "unknown".into()
            } else {
                state
            },
        })
    }

    async fn sample(&self) -> anyhow::Result<Payload> {
        let states = try_join_all(self.services.iter().map(|name| self.query(name))).await?;
        let active_count = states.iter().filter(|s| s.active).count();

        let mut payload = Payload::new();
        payload.insert("active_count".into(), active_count.into());
        payload.insert(
            "inactive_count".into(),
            (states.len() - active_count).into(),
        );
        payload.insert("services".into(), serde_json::to_value(&states)?);
        Ok(payload)
    }
}

impl Provider for ServiceStatusProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>> {
        self.sample().boxed()
    }
}
