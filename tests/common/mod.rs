// Shared test helpers

#![allow(dead_code)]

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use homewatch::history::HistoryStore;
use homewatch::models::{Payload, Sample};
use homewatch::providers::Provider;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub fn payload(fields: &[(&str, f64)]) -> Payload {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::json!(v)))
        .collect()
}

pub fn numeric_sample(source_id: &str, timestamp: u64, fields: &[(&str, f64)]) -> Sample {
    Sample::ok(source_id, timestamp, payload(fields))
}

/// Store in a fresh temp dir; keep the TempDir alive for the test's duration.
pub async fn temp_store(retention: Duration) -> (TempDir, HistoryStore) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("history.db");
    let store = HistoryStore::connect(path.to_str().unwrap(), 2, retention)
        .await
        .unwrap();
    store.init().await.unwrap();
    (dir, store)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Hang,
}

/// Provider whose next answers are set by the test.
pub struct ScriptedProvider {
    source_id: String,
    behavior: Mutex<Behavior>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(source_id: &str, behavior: Behavior) -> Self {
        Self {
            source_id: source_id.to_string(),
            behavior: Mutex::new(behavior),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Provider for ScriptedProvider {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            Behavior::Succeed => {
                futures_util::future::ready(Ok(payload(&[("calls", call as f64)]))).boxed()
            }
            Behavior::Fail => {
                futures_util::future::ready(Err(anyhow::anyhow!("tool exited with 1"))).boxed()
            }
            Behavior::Hang => futures_util::future::pending().boxed(),
        }
    }
}
