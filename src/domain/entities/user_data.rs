use crate::domain::entities::record::Record;
use crate::domain::value_objects::{Collection, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-owner cached snapshot, persisted as one JSON document under
/// `user_data:{ownerId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    #[serde(default)]
    pub collections: HashMap<Collection, Vec<Record>>,
    pub last_updated: DateTime<Utc>,
}

impl UserData {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            collections: HashMap::new(),
            last_updated: now,
        }
    }

    pub fn records(&self, collection: Collection) -> Option<&Vec<Record>> {
        self.collections.get(&collection)
    }

    pub fn set_records(&mut self, collection: Collection, records: Vec<Record>, now: DateTime<Utc>) {
        self.collections.insert(collection, records);
        self.last_updated = now;
    }

    pub fn upsert(&mut self, collection: Collection, record: Record, now: DateTime<Utc>) {
        let records = self.collections.entry(collection).or_default();
        match records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.last_updated = now;
    }

    /// Removes a record by id. Returns whether anything was removed.
    pub fn remove(&mut self, collection: Collection, id: &RecordId, now: DateTime<Utc>) -> bool {
        let Some(records) = self.collections.get_mut(&collection) else {
            return false;
        };
        let before = records.len();
        records.retain(|record| &record.id != id);
        let removed = records.len() != before;
        if removed {
            self.last_updated = now;
        }
        removed
    }
}
