use crate::domain::entities::record::Record;
use crate::domain::value_objects::RecordId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A UI-issued mutation handed to the reconciler.
#[derive(Debug, Clone)]
pub enum WriteRequest {
    Create { payload: Map<String, Value> },
    Update { record: Record },
    Delete { id: RecordId },
}

/// What the caller gets back from a write. A pending outcome is still a
/// success: the operation is queued and the cache already reflects it.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Confirmed by the remote store; carries the canonical copy for
    /// creates and updates, `None` for deletes.
    Synced(Option<Record>),
    /// Queued for a later flush; carries the optimistic local copy.
    Pending(Option<Record>),
}

impl WriteOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, WriteOutcome::Pending(_))
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            WriteOutcome::Synced(record) | WriteOutcome::Pending(record) => record.as_ref(),
        }
    }
}

/// Outcome of one flush pass over the offline queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    pub committed: u32,
    pub failed: u32,
    /// Entries skipped because their backoff delay has not elapsed.
    pub deferred: u32,
    pub remaining: u32,
    pub already_running: bool,
}

impl FlushReport {
    pub fn already_running() -> Self {
        Self {
            already_running: true,
            ..Self::default()
        }
    }
}
