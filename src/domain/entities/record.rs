use crate::domain::value_objects::{Collection, OwnerId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One business entity (truck, maintenance entry, part, supplier,
/// purchase order, notification) as stored and synced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    pub owner_id: OwnerId,
    pub collection: Collection,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        id: RecordId,
        owner_id: OwnerId,
        collection: Collection,
        payload: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner_id,
            collection,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }
}

/// The single conflict rule of the engine: the copy with the greater
/// `updated_at` wins. Seeds from `local` preserving its order, replaces an
/// entry only when the remote copy is strictly newer, appends unseen ids.
///
/// `updated_at` is a client wall-clock stamp, so two offline writers can
/// race on skewed clocks; there is no server-authoritative sequence.
pub fn merge_by_recency(local: &[Record], remote: &[Record]) -> Vec<Record> {
    let mut merged: Vec<Record> = local.to_vec();
    let mut index: HashMap<RecordId, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, record)| (record.id.clone(), i))
        .collect();

    for record in remote {
        match index.get(&record.id) {
            Some(&i) => {
                if record.updated_at > merged[i].updated_at {
                    merged[i] = record.clone();
                }
            }
            None => {
                index.insert(record.id.clone(), merged.len());
                merged.push(record.clone());
            }
        }
    }

    merged
}

/// True when a fetched snapshot carries anything the cached one lacks:
/// a different record count, an unseen id, or a strictly newer copy.
pub fn has_newer_data(cached: &[Record], fetched: &[Record]) -> bool {
    if cached.len() != fetched.len() {
        return true;
    }
    let by_id: HashMap<&RecordId, &Record> =
        cached.iter().map(|record| (&record.id, record)).collect();
    fetched.iter().any(|record| match by_id.get(&record.id) {
        Some(cached) => record.updated_at > cached.updated_at,
        None => true,
    })
}

/// Rewrite every string occurrence of a retired local id inside a payload
/// tree, so cross-references held by other records follow the canonical id.
/// Returns whether anything was rewritten.
pub fn rewrite_id_references(value: &mut Value, from: &RecordId, to: &RecordId) -> bool {
    match value {
        Value::String(s) => {
            if s == from.as_str() {
                *s = to.as_str().to_string();
                return true;
            }
            false
        }
        Value::Array(items) => {
            let mut changed = false;
            for item in items {
                changed |= rewrite_id_references(item, from, to);
            }
            changed
        }
        Value::Object(map) => {
            let mut changed = false;
            for item in map.values_mut() {
                changed |= rewrite_id_references(item, from, to);
            }
            changed
        }
        _ => false,
    }
}
