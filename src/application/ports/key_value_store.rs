use crate::shared::error::AppError;
use async_trait::async_trait;

/// Durable key-value persistence behind the cache and the offline queue.
/// Values are JSON documents; one implementation per storage backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>, AppError>;
    async fn store(&self, key: &str, value: String) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
}
