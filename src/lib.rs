pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
mod state;

pub use application::ports::{KeyValueStore, RemoteResult, RemoteStore, RemoteStoreError};
pub use application::services::{SyncService, SyncStatus};
pub use domain::entities::{FlushReport, Record, UserData, WriteOutcome, WriteRequest};
pub use domain::value_objects::{Collection, OwnerId, RecordId};
pub use shared::{AppConfig, AppError, RateLimiter, Result};
pub use state::AppState;

pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetsync=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
