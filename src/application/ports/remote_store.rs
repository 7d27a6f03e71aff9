use crate::domain::entities::Record;
use crate::domain::value_objects::{Collection, OwnerId, RecordId};
use async_trait::async_trait;
use thiserror::Error;

/// Transport-level outcome of a remote call. The reconciler matches on the
/// variant to decide between surfacing an error and queueing the write.
#[derive(Debug, Error)]
pub enum RemoteStoreError {
    #[error("No network path to the remote store")]
    Offline,

    #[error("Remote call exceeded its deadline")]
    Timeout,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Remote store error: {0}")]
    Server(String),
}

impl RemoteStoreError {
    /// Whether the failed operation should be queued and retried rather
    /// than surfaced to the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RemoteStoreError::NotFound(_))
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteStoreError>;

/// The hosted document store, consumed through a narrow interface. Callers
/// wrap every call in their own deadline; `create` assigns the canonical id.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create(&self, collection: Collection, record: Record) -> RemoteResult<Record>;
    async fn update(&self, collection: Collection, record: Record) -> RemoteResult<Record>;
    async fn delete(&self, collection: Collection, id: &RecordId) -> RemoteResult<()>;
    async fn query(&self, collection: Collection, owner: &OwnerId) -> RemoteResult<Vec<Record>>;
}
