use crate::application::ports::KeyValueStore;
use crate::domain::entities::record::rewrite_id_references;
use crate::domain::entities::{QueueEntry, QueuedOperation, Record};
use crate::domain::value_objects::{Collection, RecordId};
use crate::shared::error::AppError;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Backoff schedule for queued writes that keep failing. Retries are
/// unbounded: entries are never dropped, only deferred.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let exp = attempt_count.saturating_sub(1).min(16);
        let secs = self
            .base_delay_secs
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_secs);
        Duration::seconds(secs as i64)
    }
}

/// Per-collection FIFO of writes awaiting a reachable remote, persisted
/// under `offline_queue:{collection}`.
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    retry: RetryPolicy,
    queues: RwLock<HashMap<Collection, Vec<QueueEntry>>>,
    hydrated: RwLock<HashSet<Collection>>,
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            queues: RwLock::new(HashMap::new()),
            hydrated: RwLock::new(HashSet::new()),
        }
    }

    fn storage_key(collection: Collection) -> String {
        format!("offline_queue:{}", collection.as_str())
    }

    async fn hydrate(&self, collection: Collection) -> Result<(), AppError> {
        {
            let hydrated = self.hydrated.read().await;
            if hydrated.contains(&collection) {
                return Ok(());
            }
        }

        let entries = match self.store.load(&Self::storage_key(collection)).await? {
            Some(json) => serde_json::from_str::<Vec<QueueEntry>>(&json)?,
            None => Vec::new(),
        };

        let mut queues = self.queues.write().await;
        let mut hydrated = self.hydrated.write().await;
        if hydrated.insert(collection) {
            queues.insert(collection, entries);
        }
        Ok(())
    }

    async fn persist(
        &self,
        collection: Collection,
        entries: &[QueueEntry],
    ) -> Result<(), AppError> {
        let json = serde_json::to_string(entries)?;
        self.store.store(&Self::storage_key(collection), json).await
    }

    pub async fn enqueue(&self, entry: QueueEntry) -> Result<(), AppError> {
        let collection = entry.collection;
        self.hydrate(collection).await?;

        let mut queues = self.queues.write().await;
        let entries = queues.entry(collection).or_default();
        entries.push(entry);
        self.persist(collection, entries).await
    }

    pub async fn pending(&self, collection: Collection) -> Result<Vec<QueueEntry>, AppError> {
        self.hydrate(collection).await?;
        let queues = self.queues.read().await;
        Ok(queues.get(&collection).cloned().unwrap_or_default())
    }

    pub async fn pending_count(&self) -> Result<u32, AppError> {
        let mut count = 0;
        for collection in Collection::ALL {
            count += self.pending(collection).await?.len() as u32;
        }
        Ok(count)
    }

    /// FIFO snapshot across every collection. Entries stay queued until
    /// individually acknowledged.
    pub async fn drain(&self) -> Result<Vec<QueueEntry>, AppError> {
        let mut snapshot = Vec::new();
        for collection in Collection::ALL {
            snapshot.extend(self.pending(collection).await?);
        }
        Ok(snapshot)
    }

    /// Current state of one entry, if it is still queued.
    pub async fn get(
        &self,
        collection: Collection,
        entry_id: &str,
    ) -> Result<Option<QueueEntry>, AppError> {
        self.hydrate(collection).await?;
        let queues = self.queues.read().await;
        Ok(queues
            .get(&collection)
            .and_then(|entries| entries.iter().find(|entry| entry.entry_id == entry_id))
            .cloned())
    }

    /// Removes an entry once the remote store confirmed its operation.
    pub async fn ack(&self, collection: Collection, entry_id: &str) -> Result<(), AppError> {
        self.hydrate(collection).await?;

        let mut queues = self.queues.write().await;
        let entries = queues.entry(collection).or_default();
        entries.retain(|entry| entry.entry_id != entry_id);
        self.persist(collection, entries).await
    }

    /// Leaves the entry queued, bumps its attempt count and defers the next
    /// try per the backoff schedule.
    pub async fn record_failure(
        &self,
        collection: Collection,
        entry_id: &str,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.hydrate(collection).await?;

        let mut queues = self.queues.write().await;
        let entries = queues.entry(collection).or_default();
        if let Some(entry) = entries.iter_mut().find(|entry| entry.entry_id == entry_id) {
            let backoff = self.retry.backoff(entry.attempt_count + 1);
            entry.mark_failed(error, now, backoff);
        }
        self.persist(collection, entries).await
    }

    /// Folds a newer copy of a still-unsynced record into its queued
    /// create/update, keeping the entry's queue position. Returns whether
    /// a queued entry was found.
    pub async fn fold_update(
        &self,
        collection: Collection,
        record: &Record,
    ) -> Result<bool, AppError> {
        self.hydrate(collection).await?;

        let mut queues = self.queues.write().await;
        let entries = queues.entry(collection).or_default();
        let mut found = false;
        for entry in entries.iter_mut() {
            match &mut entry.operation {
                QueuedOperation::Create(existing) | QueuedOperation::Update(existing)
                    if existing.id == record.id =>
                {
                    *existing = record.clone();
                    found = true;
                }
                _ => {}
            }
        }
        if found {
            self.persist(collection, entries).await?;
        }
        Ok(found)
    }

    /// Drops every queued operation targeting a record, returning the
    /// removed entries. Used when a still-local record is deleted: its
    /// queued create never needs to reach the network.
    pub async fn remove_for_record(
        &self,
        collection: Collection,
        record_id: &RecordId,
    ) -> Result<Vec<QueueEntry>, AppError> {
        self.hydrate(collection).await?;

        let mut queues = self.queues.write().await;
        let entries = queues.entry(collection).or_default();
        let (removed, kept): (Vec<QueueEntry>, Vec<QueueEntry>) = entries
            .drain(..)
            .partition(|entry| entry.operation.record_id() == record_id);
        *entries = kept;
        self.persist(collection, entries).await?;
        Ok(removed)
    }

    /// Rewrites a retired local id across every queued entry: the entry's
    /// own record id and any payload references held by other entries.
    pub async fn rewrite_record_id(
        &self,
        from: &RecordId,
        to: &RecordId,
    ) -> Result<(), AppError> {
        for collection in Collection::ALL {
            self.hydrate(collection).await?;
        }

        let mut queues = self.queues.write().await;
        for collection in Collection::ALL {
            let Some(entries) = queues.get_mut(&collection) else {
                continue;
            };
            let mut changed = false;
            for entry in entries.iter_mut() {
                match &mut entry.operation {
                    QueuedOperation::Create(record) | QueuedOperation::Update(record) => {
                        if &record.id == from {
                            record.id = to.clone();
                            changed = true;
                        }
                        for value in record.payload.values_mut() {
                            changed |= rewrite_id_references(value, from, to);
                        }
                    }
                    QueuedOperation::Delete { record_id, .. } => {
                        if record_id == from {
                            *record_id = to.clone();
                            changed = true;
                        }
                    }
                }
            }
            if changed {
                self.persist(collection, entries).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Record;
    use crate::domain::value_objects::OwnerId;
    use crate::infrastructure::storage::InMemoryKeyValueStore;
    use serde_json::{Map, json};

    fn retry() -> RetryPolicy {
        RetryPolicy {
            base_delay_secs: 30,
            max_delay_secs: 3_600,
        }
    }

    fn queue() -> OfflineQueue {
        OfflineQueue::new(Arc::new(InMemoryKeyValueStore::new()), retry())
    }

    fn truck(id: &str) -> Record {
        Record::new(
            RecordId::new(id.to_string()).unwrap(),
            OwnerId::new("owner-1".to_string()).unwrap(),
            Collection::Trucks,
            Map::new(),
            Utc::now(),
        )
    }

    fn create_entry(id: &str) -> QueueEntry {
        QueueEntry::new(
            Collection::Trucks,
            QueuedOperation::Create(truck(id)),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_enqueue_preserves_fifo_order() {
        let queue = queue();
        queue.enqueue(create_entry("local_1")).await.unwrap();
        queue.enqueue(create_entry("local_2")).await.unwrap();

        let pending = queue.pending(Collection::Trucks).await.unwrap();
        let ids: Vec<&str> = pending
            .iter()
            .map(|entry| entry.operation.record_id().as_str())
            .collect();
        assert_eq!(ids, vec!["local_1", "local_2"]);
    }

    #[tokio::test]
    async fn test_drain_leaves_entries_until_acked() {
        let queue = queue();
        let entry = create_entry("local_1");
        let entry_id = entry.entry_id.clone();
        queue.enqueue(entry).await.unwrap();

        assert_eq!(queue.drain().await.unwrap().len(), 1);
        assert_eq!(queue.pending(Collection::Trucks).await.unwrap().len(), 1);

        queue.ack(Collection::Trucks, &entry_id).await.unwrap();
        assert!(queue.pending(Collection::Trucks).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_failure_defers_next_attempt() {
        let queue = queue();
        let entry = create_entry("local_1");
        let entry_id = entry.entry_id.clone();
        queue.enqueue(entry).await.unwrap();

        let now = Utc::now();
        queue
            .record_failure(Collection::Trucks, &entry_id, "offline".to_string(), now)
            .await
            .unwrap();

        let pending = queue.pending(Collection::Trucks).await.unwrap();
        assert_eq!(pending[0].attempt_count, 1);
        assert!(!pending[0].is_due(now));
        assert_eq!(pending[0].next_attempt_at, now + Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_backoff_doubles_and_caps() {
        let retry = retry();
        assert_eq!(retry.backoff(1), Duration::seconds(30));
        assert_eq!(retry.backoff(2), Duration::seconds(60));
        assert_eq!(retry.backoff(5), Duration::seconds(480));
        assert_eq!(retry.backoff(12), Duration::seconds(3_600));
        assert_eq!(retry.backoff(40), Duration::seconds(3_600));
    }

    #[tokio::test]
    async fn test_queue_survives_a_new_instance_over_the_same_backend() {
        let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());

        let queue = OfflineQueue::new(store.clone(), retry());
        queue.enqueue(create_entry("local_1")).await.unwrap();

        let reopened = OfflineQueue::new(store, retry());
        assert_eq!(reopened.pending(Collection::Trucks).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_for_record_cancels_queued_writes() {
        let queue = queue();
        queue.enqueue(create_entry("local_1")).await.unwrap();
        queue.enqueue(create_entry("local_2")).await.unwrap();

        let id = RecordId::new("local_1".to_string()).unwrap();
        let removed = queue
            .remove_for_record(Collection::Trucks, &id)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(queue.pending(Collection::Trucks).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_record_id_updates_entries_and_references() {
        let queue = queue();
        queue.enqueue(create_entry("local_1")).await.unwrap();

        let mut dependent = truck("local_2");
        dependent.payload.insert("parentId".into(), json!("local_1"));
        queue
            .enqueue(QueueEntry::new(
                Collection::Trucks,
                QueuedOperation::Create(dependent),
                Utc::now(),
            ))
            .await
            .unwrap();

        let from = RecordId::new("local_1".to_string()).unwrap();
        let to = RecordId::new("truck-9".to_string()).unwrap();
        queue.rewrite_record_id(&from, &to).await.unwrap();

        let pending = queue.pending(Collection::Trucks).await.unwrap();
        assert_eq!(pending[0].operation.record_id().as_str(), "truck-9");
        match &pending[1].operation {
            QueuedOperation::Create(record) => {
                assert_eq!(record.payload["parentId"], json!("truck-9"));
            }
            other => panic!("unexpected operation: {other:?}"),
        }
    }
}
