// Failure taxonomy of the monitoring core. None of these end the process: each one is
// recorded, counted or logged where it happens and the rest of the system keeps going.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// A provider's tool or process failed or timed out. Recorded in the sample.
    #[error("source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// Out-of-order sample for a source; dropped by the aggregator.
    #[error("stale sample for {source_id}: timestamp {timestamp} <= stored {stored}")]
    StaleSample {
        source_id: String,
        timestamp: u64,
        stored: u64,
    },

    /// History persistence failed on every attempt; the batch is dropped.
    #[error("history write failed after {attempts} attempts, dropped {records} records: {reason}")]
    StorageWriteFailure {
        records: usize,
        attempts: u32,
        reason: String,
    },

    /// A viewer's outbound queue saturated; a coalesced resync marker replaces the backlog head.
    #[error("viewer {connection_id} queue full at depth {depth}, resync queued")]
    ViewerOverflow { connection_id: u64, depth: usize },

    /// A viewer stopped answering heartbeats and was evicted.
    #[error("viewer {connection_id} missed {missed} consecutive heartbeats")]
    ViewerDead { connection_id: u64, missed: u32 },
}
