use crate::application::ports::{RemoteResult, RemoteStore, RemoteStoreError};
use crate::domain::entities::record::{has_newer_data, merge_by_recency};
use crate::domain::entities::{
    FlushReport, QueueEntry, QueuedOperation, Record, WriteOutcome, WriteRequest,
};
use crate::domain::value_objects::{Collection, OwnerId, RecordId};
use crate::infrastructure::cache::PersistentCache;
use crate::infrastructure::offline::OfflineQueue;
use crate::shared::config::SyncConfig;
use crate::shared::error::AppError;
use crate::shared::rate_limiter::RateLimiter;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SyncStatus {
    pub is_flushing: bool,
    pub pending_entries: u32,
    pub last_flush: Option<DateTime<Utc>>,
    pub flush_errors: u32,
}

/// Reconciles the local cache, the offline queue and the remote store.
/// Reads never wait on the network beyond the first fetch for an owner;
/// writes fall back to the queue instead of failing.
pub struct SyncService {
    cache: Arc<PersistentCache>,
    queue: Arc<OfflineQueue>,
    remote: Arc<dyn RemoteStore>,
    limiter: Arc<RateLimiter>,
    config: SyncConfig,
    flush_in_flight: Arc<AtomicBool>,
    status: Arc<RwLock<SyncStatus>>,
}

impl SyncService {
    pub fn new(
        cache: Arc<PersistentCache>,
        queue: Arc<OfflineQueue>,
        remote: Arc<dyn RemoteStore>,
        limiter: Arc<RateLimiter>,
        config: SyncConfig,
    ) -> Self {
        Self {
            cache,
            queue,
            remote,
            limiter,
            config,
            flush_in_flight: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(SyncStatus {
                is_flushing: false,
                pending_entries: 0,
                last_flush: None,
                flush_errors: 0,
            })),
        }
    }

    pub async fn status(&self) -> SyncStatus {
        self.status.read().await.clone()
    }

    /// Serves the cached snapshot and refreshes it in the background. Only
    /// an owner/collection that was never cached waits on the network, with
    /// the short foreground deadline and an empty (not failed) fallback.
    pub async fn read(
        &self,
        owner: &OwnerId,
        collection: Collection,
    ) -> Result<Vec<Record>, AppError> {
        match self.cache.snapshot(owner, collection).await? {
            Some(records) => {
                self.spawn_background_refresh(owner.clone(), collection);
                Ok(records)
            }
            None => self.foreground_fetch(owner, collection).await,
        }
    }

    fn spawn_background_refresh(&self, owner: OwnerId, collection: Collection) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.background_refresh(&owner, collection).await {
                tracing::debug!("Background refresh failed for {}/{}: {}", owner, collection, e);
            }
        });
    }

    /// Refresh with the long deadline. Any failure leaves the cached
    /// snapshot exactly as it was.
    async fn background_refresh(
        &self,
        owner: &OwnerId,
        collection: Collection,
    ) -> Result<(), AppError> {
        let fetched = self
            .with_deadline(self.config.background_timeout_ms, self.remote.query(collection, owner))
            .await
            .map_err(remote_error)?;

        let cached = self.cache.get(owner, collection).await?;
        if has_newer_data(&cached, &fetched) {
            let merged = merge_by_recency(&cached, &fetched);
            self.cache.set(owner, collection, merged).await?;
        }
        Ok(())
    }

    async fn foreground_fetch(
        &self,
        owner: &OwnerId,
        collection: Collection,
    ) -> Result<Vec<Record>, AppError> {
        match self
            .with_deadline(self.config.foreground_timeout_ms, self.remote.query(collection, owner))
            .await
        {
            Ok(records) => {
                self.cache.set(owner, collection, records.clone()).await?;
                Ok(records)
            }
            Err(err) => {
                tracing::debug!(
                    "Foreground fetch failed for {}/{}, serving empty: {}",
                    owner,
                    collection,
                    err
                );
                Ok(Vec::new())
            }
        }
    }

    /// Rate limit first, then race the remote against the short deadline;
    /// unreachable or failing remotes queue the write and mutate the cache
    /// optimistically so the UI reflects it immediately.
    pub async fn write(
        &self,
        owner: &OwnerId,
        collection: Collection,
        request: WriteRequest,
    ) -> Result<WriteOutcome, AppError> {
        let admission = self
            .limiter
            .admit(&collection.write_endpoint(), owner.as_str())
            .await;
        if !admission.allowed {
            return Err(AppError::rate_limited(admission.retry_after_secs.unwrap_or(1)));
        }

        let now = Utc::now();
        match request {
            WriteRequest::Create { payload } => {
                let draft = Record::new(RecordId::new_local(), owner.clone(), collection, payload, now);
                match self
                    .with_deadline(
                        self.config.foreground_timeout_ms,
                        self.remote.create(collection, draft.clone()),
                    )
                    .await
                {
                    Ok(record) => {
                        self.cache.upsert(owner, collection, record.clone()).await?;
                        Ok(WriteOutcome::Synced(Some(record)))
                    }
                    Err(err) if err.is_recoverable() => {
                        self.enqueue_pending(
                            QueueEntry::new(collection, QueuedOperation::Create(draft.clone()), now),
                            &err,
                        )
                        .await?;
                        self.cache.upsert(owner, collection, draft.clone()).await?;
                        Ok(WriteOutcome::Pending(Some(draft)))
                    }
                    Err(err) => Err(remote_error(err)),
                }
            }
            WriteRequest::Update { mut record } => {
                record.touch(now);
                if record.id.is_local() {
                    // Never synced: fold into the queued create rather than
                    // sending an update for an id the remote has not seen.
                    if !self.queue.fold_update(collection, &record).await? {
                        self.queue
                            .enqueue(QueueEntry::new(
                                collection,
                                QueuedOperation::Create(record.clone()),
                                now,
                            ))
                            .await?;
                    }
                    self.cache.upsert(owner, collection, record.clone()).await?;
                    return Ok(WriteOutcome::Pending(Some(record)));
                }

                match self
                    .with_deadline(
                        self.config.foreground_timeout_ms,
                        self.remote.update(collection, record.clone()),
                    )
                    .await
                {
                    Ok(committed) => {
                        self.cache.upsert(owner, collection, committed.clone()).await?;
                        Ok(WriteOutcome::Synced(Some(committed)))
                    }
                    Err(err) if err.is_recoverable() => {
                        if !self.queue.fold_update(collection, &record).await? {
                            self.enqueue_pending(
                                QueueEntry::new(
                                    collection,
                                    QueuedOperation::Update(record.clone()),
                                    now,
                                ),
                                &err,
                            )
                            .await?;
                        }
                        self.cache.upsert(owner, collection, record.clone()).await?;
                        Ok(WriteOutcome::Pending(Some(record)))
                    }
                    Err(err) => Err(remote_error(err)),
                }
            }
            WriteRequest::Delete { id } => {
                if id.is_local() {
                    // The record never reached the remote: cancel its queued
                    // create and drop the cached copy, all locally.
                    self.queue.remove_for_record(collection, &id).await?;
                    self.cache.remove(owner, collection, &id).await?;
                    return Ok(WriteOutcome::Synced(None));
                }

                match self
                    .with_deadline(
                        self.config.foreground_timeout_ms,
                        self.remote.delete(collection, &id),
                    )
                    .await
                {
                    Ok(()) => {
                        self.queue.remove_for_record(collection, &id).await?;
                        self.cache.remove(owner, collection, &id).await?;
                        Ok(WriteOutcome::Synced(None))
                    }
                    Err(err) if err.is_recoverable() => {
                        // Supersede any queued update for the record before
                        // queueing the delete.
                        self.queue.remove_for_record(collection, &id).await?;
                        self.enqueue_pending(
                            QueueEntry::new(
                                collection,
                                QueuedOperation::Delete {
                                    owner_id: owner.clone(),
                                    record_id: id.clone(),
                                },
                                now,
                            ),
                            &err,
                        )
                        .await?;
                        self.cache.remove(owner, collection, &id).await?;
                        Ok(WriteOutcome::Pending(None))
                    }
                    Err(err) => Err(remote_error(err)),
                }
            }
        }
    }

    async fn enqueue_pending(&self, entry: QueueEntry, cause: &RemoteStoreError) -> Result<(), AppError> {
        tracing::info!(
            collection = entry.collection.as_str(),
            record_id = entry.operation.record_id().as_str(),
            "Remote unreachable ({}), queueing write",
            cause
        );
        self.queue.enqueue(entry).await?;
        let mut status = self.status.write().await;
        status.pending_entries = self.queue.pending_count().await?;
        Ok(())
    }

    /// Commits the offline queue. Single-flight: a flush issued while one
    /// is running is a no-op. Entries failing again stay queued with their
    /// backoff bumped; nothing is ever dropped.
    pub async fn flush(&self) -> Result<FlushReport, AppError> {
        self.run_flush(false).await
    }

    /// Connectivity just came back: retry everything, ignoring backoff.
    pub async fn on_connectivity_restored(&self) -> Result<FlushReport, AppError> {
        tracing::info!("Connectivity restored, flushing offline queue");
        self.run_flush(true).await
    }

    async fn run_flush(&self, ignore_backoff: bool) -> Result<FlushReport, AppError> {
        if self.flush_in_flight.swap(true, Ordering::SeqCst) {
            return Ok(FlushReport::already_running());
        }
        {
            let mut status = self.status.write().await;
            status.is_flushing = true;
        }

        let result = self.flush_queue(ignore_backoff).await;

        let mut status = self.status.write().await;
        status.is_flushing = false;
        status.last_flush = Some(Utc::now());
        match &result {
            Ok(report) => {
                status.pending_entries = report.remaining;
                status.flush_errors += report.failed;
            }
            Err(_) => status.flush_errors += 1,
        }
        self.flush_in_flight.store(false, Ordering::SeqCst);

        result
    }

    async fn flush_queue(&self, ignore_backoff: bool) -> Result<FlushReport, AppError> {
        let mut report = FlushReport::default();

        for drained in self.queue.drain().await? {
            // Re-read the live entry: an earlier create in this pass may have
            // rewritten ids this entry references.
            let Some(entry) = self.queue.get(drained.collection, &drained.entry_id).await? else {
                continue;
            };
            let now = Utc::now();
            if !ignore_backoff && !entry.is_due(now) {
                report.deferred += 1;
                continue;
            }
            match self.commit_entry(&entry).await {
                Ok(()) => report.committed += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        collection = entry.collection.as_str(),
                        record_id = entry.operation.record_id().as_str(),
                        attempt = entry.attempt_count + 1,
                        "Flush attempt failed: {}",
                        err
                    );
                    self.queue
                        .record_failure(entry.collection, &entry.entry_id, err.to_string(), now)
                        .await?;
                }
            }
        }

        report.remaining = self.queue.pending_count().await?;
        Ok(report)
    }

    async fn commit_entry(&self, entry: &QueueEntry) -> Result<(), AppError> {
        let deadline_ms = self.config.background_timeout_ms;
        match &entry.operation {
            QueuedOperation::Create(record) => {
                let committed = self
                    .with_deadline(deadline_ms, self.remote.create(entry.collection, record.clone()))
                    .await
                    .map_err(remote_error)?;
                self.queue.ack(entry.collection, &entry.entry_id).await?;
                self.cache
                    .replace_id(&record.owner_id, entry.collection, &record.id, committed.clone())
                    .await?;
                self.queue.rewrite_record_id(&record.id, &committed.id).await?;
                Ok(())
            }
            QueuedOperation::Update(record) => {
                let committed = self
                    .with_deadline(deadline_ms, self.remote.update(entry.collection, record.clone()))
                    .await
                    .map_err(remote_error)?;
                self.queue.ack(entry.collection, &entry.entry_id).await?;
                self.cache
                    .upsert(&record.owner_id, entry.collection, committed)
                    .await?;
                Ok(())
            }
            QueuedOperation::Delete { owner_id, record_id } => {
                match self
                    .with_deadline(deadline_ms, self.remote.delete(entry.collection, record_id))
                    .await
                {
                    // Already gone remotely counts as delivered.
                    Ok(()) | Err(RemoteStoreError::NotFound(_)) => {
                        self.queue.ack(entry.collection, &entry.entry_id).await?;
                        self.cache.remove(owner_id, entry.collection, record_id).await?;
                        Ok(())
                    }
                    Err(err) => Err(remote_error(err)),
                }
            }
        }
    }

    /// Periodic flush loop; failures are logged and retried next tick.
    pub fn spawn_periodic_flush(&self) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        let period = Duration::from_secs(self.config.flush_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick fires immediately; skip it so the first flush
            // happens one full period after startup.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = service.flush().await {
                    tracing::error!("Periodic flush error: {}", e);
                }
            }
        })
    }

    /// Best-effort flush at process teardown; fire-and-forget.
    pub fn flush_on_teardown(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.flush().await {
                tracing::debug!("Teardown flush did not complete: {}", e);
            }
        });
    }

    async fn with_deadline<T>(
        &self,
        deadline_ms: u64,
        call: impl Future<Output = RemoteResult<T>>,
    ) -> RemoteResult<T> {
        match timeout(Duration::from_millis(deadline_ms), call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteStoreError::Timeout),
        }
    }
}

impl Clone for SyncService {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            queue: self.queue.clone(),
            remote: self.remote.clone(),
            limiter: self.limiter.clone(),
            config: self.config.clone(),
            flush_in_flight: self.flush_in_flight.clone(),
            status: self.status.clone(),
        }
    }
}

fn remote_error(err: RemoteStoreError) -> AppError {
    match err {
        RemoteStoreError::Offline => AppError::Offline("remote store unreachable".to_string()),
        RemoteStoreError::Timeout => AppError::Timeout("remote call deadline exceeded".to_string()),
        RemoteStoreError::NotFound(id) => AppError::NotFound(id),
        RemoteStoreError::Server(msg) => AppError::Internal(msg),
    }
}
