use crate::application::ports::KeyValueStore;
use crate::domain::entities::record::rewrite_id_references;
use crate::domain::entities::{Record, UserData};
use crate::domain::value_objects::{Collection, OwnerId, RecordId};
use crate::shared::error::AppError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Local snapshot store every read is served from. Mirrors one `UserData`
/// document per owner in memory, hydrates lazily from the backend, and
/// writes through on every mutation so a restart loses nothing.
pub struct PersistentCache {
    store: Arc<dyn KeyValueStore>,
    owners: RwLock<HashMap<OwnerId, UserData>>,
}

impl PersistentCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            owners: RwLock::new(HashMap::new()),
        }
    }

    fn storage_key(owner: &OwnerId) -> String {
        format!("user_data:{owner}")
    }

    async fn hydrate(&self, owner: &OwnerId) -> Result<(), AppError> {
        {
            let owners = self.owners.read().await;
            if owners.contains_key(owner) {
                return Ok(());
            }
        }

        let loaded = match self.store.load(&Self::storage_key(owner)).await? {
            Some(json) => serde_json::from_str::<UserData>(&json)?,
            None => UserData::new(Utc::now()),
        };

        let mut owners = self.owners.write().await;
        owners.entry(owner.clone()).or_insert(loaded);
        Ok(())
    }

    /// Applies a mutation to the owner's document and persists the result
    /// before returning, holding the write lock so readers never observe a
    /// half-applied snapshot.
    async fn mutate<T>(
        &self,
        owner: &OwnerId,
        apply: impl FnOnce(&mut UserData) -> T,
    ) -> Result<T, AppError> {
        self.hydrate(owner).await?;

        let mut owners = self.owners.write().await;
        let data = owners
            .entry(owner.clone())
            .or_insert_with(|| UserData::new(Utc::now()));
        let result = apply(data);
        let json = serde_json::to_string(data)?;
        self.store.store(&Self::storage_key(owner), json).await?;
        Ok(result)
    }

    /// Cached records, or an empty vec when nothing is cached.
    pub async fn get(&self, owner: &OwnerId, collection: Collection) -> Result<Vec<Record>, AppError> {
        Ok(self.snapshot(owner, collection).await?.unwrap_or_default())
    }

    /// Distinguishes "never cached" (`None`) from "cached and empty".
    pub async fn snapshot(
        &self,
        owner: &OwnerId,
        collection: Collection,
    ) -> Result<Option<Vec<Record>>, AppError> {
        self.hydrate(owner).await?;
        let owners = self.owners.read().await;
        Ok(owners
            .get(owner)
            .and_then(|data| data.records(collection))
            .cloned())
    }

    /// Atomic snapshot replace.
    pub async fn set(
        &self,
        owner: &OwnerId,
        collection: Collection,
        records: Vec<Record>,
    ) -> Result<(), AppError> {
        self.mutate(owner, |data| {
            data.set_records(collection, records, Utc::now());
        })
        .await
    }

    pub async fn upsert(
        &self,
        owner: &OwnerId,
        collection: Collection,
        record: Record,
    ) -> Result<(), AppError> {
        self.mutate(owner, |data| {
            data.upsert(collection, record, Utc::now());
        })
        .await
    }

    pub async fn remove(
        &self,
        owner: &OwnerId,
        collection: Collection,
        id: &RecordId,
    ) -> Result<bool, AppError> {
        self.mutate(owner, |data| data.remove(collection, id, Utc::now()))
            .await
    }

    /// Retires a local id after a confirmed create: swaps in the canonical
    /// record and rewrites references to the old id held by any other
    /// record of the same owner.
    pub async fn replace_id(
        &self,
        owner: &OwnerId,
        collection: Collection,
        retired: &RecordId,
        canonical: Record,
    ) -> Result<(), AppError> {
        self.mutate(owner, |data| {
            let now = Utc::now();
            data.remove(collection, retired, now);
            let canonical_id = canonical.id.clone();
            data.upsert(collection, canonical, now);
            for records in data.collections.values_mut() {
                for record in records.iter_mut() {
                    for value in record.payload.values_mut() {
                        rewrite_id_references(value, retired, &canonical_id);
                    }
                }
            }
        })
        .await
    }

}
