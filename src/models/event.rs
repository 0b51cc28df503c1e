// What a viewer receives. JSON: {"type": "update" | "resync" | "heartbeat", ...}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::Sample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubEvent {
    Update(Update),
    /// Updates up to `generation` were dropped; re-fetch the full snapshot.
    Resync { generation: u64 },
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub generation: u64,
    pub changed: Vec<String>,
    /// New sample for each changed source the viewer subscribes to.
    pub diff: BTreeMap<String, Arc<Sample>>,
}

impl HubEvent {
    pub fn generation(&self) -> Option<u64> {
        match self {
            HubEvent::Update(u) => Some(u.generation),
            HubEvent::Resync { generation } => Some(*generation),
            HubEvent::Heartbeat => None,
        }
    }
}
