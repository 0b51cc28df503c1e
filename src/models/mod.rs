// Core data model: samples, the aggregated snapshot, history records, viewer events

mod event;
mod history;
mod sample;
mod snapshot;

pub use event::{HubEvent, Update};
pub use history::HistoryRecord;
pub use sample::{Payload, Sample, SampleStatus, unix_millis};
pub use snapshot::SystemSnapshot;
