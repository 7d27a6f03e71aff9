use crate::application::ports::{KeyValueStore, RemoteStore};
use crate::application::services::SyncService;
use crate::infrastructure::cache::PersistentCache;
use crate::infrastructure::offline::{OfflineQueue, RetryPolicy};
use crate::infrastructure::storage::SqliteKeyValueStore;
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use crate::shared::rate_limiter::RateLimiter;
use std::sync::Arc;

/// The engine's services, built once at startup and handed to the
/// embedding application by reference; there is no global instance.
pub struct AppState {
    pub config: AppConfig,
    pub cache: Arc<PersistentCache>,
    pub queue: Arc<OfflineQueue>,
    pub rate_limiter: Arc<RateLimiter>,
    pub sync: Arc<SyncService>,
}

impl AppState {
    /// Production wiring over the configured sqlite database. Spawns the
    /// periodic flush when `sync.auto_flush` is enabled.
    pub async fn new(config: AppConfig, remote: Arc<dyn RemoteStore>) -> Result<Self, AppError> {
        config.validate().map_err(AppError::InvalidInput)?;

        let store: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::connect(&config.database).await?);
        let state = Self::with_store(config, store, remote);
        if state.config.sync.auto_flush {
            state.sync.spawn_periodic_flush();
        }
        Ok(state)
    }

    /// Same wiring over any storage backend; used with the in-memory store
    /// in tests. Does not spawn background tasks.
    pub fn with_store(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let cache = Arc::new(PersistentCache::new(store.clone()));
        let queue = Arc::new(OfflineQueue::new(
            store,
            RetryPolicy {
                base_delay_secs: config.sync.retry_base_delay_secs,
                max_delay_secs: config.sync.retry_max_delay_secs,
            },
        ));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let sync = Arc::new(SyncService::new(
            cache.clone(),
            queue.clone(),
            remote,
            rate_limiter.clone(),
            config.sync.clone(),
        ));

        Self {
            config,
            cache,
            queue,
            rate_limiter,
            sync,
        }
    }
}
