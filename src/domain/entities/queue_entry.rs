use crate::domain::entities::record::Record;
use crate::domain::value_objects::{Collection, OwnerId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A write that could not reach the remote store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data", rename_all = "camelCase")]
pub enum QueuedOperation {
    Create(Record),
    Update(Record),
    #[serde(rename_all = "camelCase")]
    Delete {
        owner_id: OwnerId,
        record_id: RecordId,
    },
}

impl QueuedOperation {
    pub fn record_id(&self) -> &RecordId {
        match self {
            QueuedOperation::Create(record) | QueuedOperation::Update(record) => &record.id,
            QueuedOperation::Delete { record_id, .. } => record_id,
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        match self {
            QueuedOperation::Create(record) | QueuedOperation::Update(record) => &record.owner_id,
            QueuedOperation::Delete { owner_id, .. } => owner_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub entry_id: String,
    pub collection: Collection,
    pub operation: QueuedOperation,
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn new(collection: Collection, operation: QueuedOperation, now: DateTime<Utc>) -> Self {
        Self {
            entry_id: Uuid::new_v4().to_string(),
            collection,
            operation,
            attempt_count: 0,
            enqueued_at: now,
            next_attempt_at: now,
            last_error: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_attempt_at
    }

    pub fn mark_failed(
        &mut self,
        error: String,
        now: DateTime<Utc>,
        backoff: chrono::Duration,
    ) {
        self.attempt_count += 1;
        self.last_error = Some(error);
        self.next_attempt_at = now + backoff;
    }
}
