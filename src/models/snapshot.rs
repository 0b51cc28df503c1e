// Aggregated view: latest sample per source plus the generation that produced it

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::Sample;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    /// Incremented on every successful merge; 0 means nothing merged yet.
    pub generation: u64,
    /// Samples are shared with published updates, never copied per viewer.
    pub sources: BTreeMap<String, Arc<Sample>>,
}

impl SystemSnapshot {
    pub fn get(&self, source_id: &str) -> Option<&Sample> {
        self.sources.get(source_id).map(Arc::as_ref)
    }

    /// Current samples for the `changed` sources accepted by `wants`.
    pub fn diff(
        &self,
        changed: &[String],
        wants: impl Fn(&str) -> bool,
    ) -> BTreeMap<String, Arc<Sample>> {
        changed
            .iter()
            .filter(|id| wants(id.as_str()))
            .filter_map(|id| self.sources.get(id).map(|s| (id.clone(), s.clone())))
            .collect()
    }
}
