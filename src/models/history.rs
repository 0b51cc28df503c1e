// Chartable slice of a sample, as persisted by the history store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Sample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub source_id: String,
    /// Unix time in milliseconds.
    pub timestamp: u64,
    pub numeric_fields: BTreeMap<String, f64>,
}

impl HistoryRecord {
    /// None when the sample is not Ok or has no numeric top-level fields.
    pub fn from_sample(sample: &Sample) -> Option<Self> {
        let numeric_fields = sample.numeric_fields();
        if numeric_fields.is_empty() {
            return None;
        }
        Some(Self {
            source_id: sample.source_id.clone(),
            timestamp: sample.timestamp,
            numeric_fields,
        })
    }
}
