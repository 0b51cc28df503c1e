// One poll result from one source

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque key-value payload produced by a provider.
pub type Payload = BTreeMap<String, serde_json::Value>;

/// Outcome of a poll; serializes to lowercase JSON (e.g. "unavailable").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Ok,
    /// Timed out or the backing tool/process could not be reached.
    Unavailable,
    /// The backing tool ran and failed.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub source_id: String,
    /// Unix time in milliseconds.
    pub timestamp: u64,
    pub status: SampleStatus,
    pub payload: Payload,
}

impl Sample {
    pub fn ok(source_id: impl Into<String>, timestamp: u64, payload: Payload) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp,
            status: SampleStatus::Ok,
            payload,
        }
    }

    /// Failed poll; the reason is kept under the `error` payload key.
    pub fn failed(
        source_id: impl Into<String>,
        timestamp: u64,
        status: SampleStatus,
        reason: impl std::fmt::Display,
    ) -> Self {
        let mut payload = Payload::new();
        payload.insert("error".into(), serde_json::Value::String(reason.to_string()));
        Self {
            source_id: source_id.into(),
            timestamp,
            status,
            payload,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SampleStatus::Ok
    }

    /// Top-level numeric payload entries. Empty unless the sample is Ok.
    pub fn numeric_fields(&self) -> BTreeMap<String, f64> {
        if !self.is_ok() {
            return BTreeMap::new();
        }
        self.payload
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
            .collect()
    }
}

/// Current Unix time in milliseconds (0 if the clock is before the epoch).
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}
