use crate::application::ports::{RemoteResult, RemoteStore, RemoteStoreError};
use crate::domain::entities::Record;
use crate::domain::value_objects::{Collection, OwnerId, RecordId};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Scriptable failure injected before every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Offline,
    Timeout,
    Server,
}

impl FailureMode {
    fn to_error(self) -> RemoteStoreError {
        match self {
            FailureMode::Offline => RemoteStoreError::Offline,
            FailureMode::Timeout => RemoteStoreError::Timeout,
            FailureMode::Server => RemoteStoreError::Server("injected failure".to_string()),
        }
    }
}

/// In-memory document store: assigns canonical ids on create and keeps one
/// copy per id, like the hosted backend. Used by tests and local sessions
/// without connectivity requirements.
#[derive(Default)]
pub struct InMemoryRemoteStore {
    records: Mutex<Vec<Record>>,
    failure: Mutex<Option<FailureMode>>,
    calls: AtomicU32,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub async fn set_failure(&self, mode: Option<FailureMode>) {
        *self.failure.lock().await = mode;
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Preloads records as if they were committed earlier, without
    /// touching the call counter.
    pub async fn seed(&self, records: Vec<Record>) {
        self.records.lock().await.extend(records);
    }

    pub async fn records(&self, collection: Collection) -> Vec<Record> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| record.collection == collection)
            .cloned()
            .collect()
    }

    async fn begin_call(&self) -> RemoteResult<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match *self.failure.lock().await {
            Some(mode) => Err(mode.to_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn create(&self, collection: Collection, mut record: Record) -> RemoteResult<Record> {
        self.begin_call().await?;

        record.id = RecordId::new(Uuid::new_v4().to_string())
            .map_err(RemoteStoreError::Server)?;
        record.collection = collection;

        let mut records = self.records.lock().await;
        records.push(record.clone());
        Ok(record)
    }

    async fn update(&self, collection: Collection, record: Record) -> RemoteResult<Record> {
        self.begin_call().await?;

        let mut records = self.records.lock().await;
        match records
            .iter_mut()
            .find(|existing| existing.collection == collection && existing.id == record.id)
        {
            Some(existing) => {
                *existing = record.clone();
                Ok(record)
            }
            None => Err(RemoteStoreError::NotFound(record.id.to_string())),
        }
    }

    async fn delete(&self, collection: Collection, id: &RecordId) -> RemoteResult<()> {
        self.begin_call().await?;

        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|record| !(record.collection == collection && &record.id == id));
        if records.len() == before {
            return Err(RemoteStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn query(&self, collection: Collection, owner: &OwnerId) -> RemoteResult<Vec<Record>> {
        self.begin_call().await?;

        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|record| record.collection == collection && &record.owner_id == owner)
            .cloned()
            .collect())
    }
}
