//! Entry point for embedding applications.
//!
//! [`Engine`] opens the store, verifies it, wires the sync queue to the
//! backend and hands out repositories.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::{
    ActivityReportRepository, CheckpointRepository, CheckpointVerificationRepository,
    LocalStore, LocationRecordRepository, PatrolLocationRepository, PhotoRepository,
    SchemaVersion, TimeRecordRepository, UserRepository,
};
use crate::error::StoreError;
use crate::sync::{
    BreakerState, CircuitBreaker, CoordinatorOptions, DrainReport, EntityType, EntryOutcome,
    HttpRemote, QueueEntry, QueueStats, RemotePush, RetryPolicy, SyncCoordinator, SyncError,
    SyncQueue,
};

/// A running background drain loop.
#[derive(Debug)]
pub struct BackgroundHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BackgroundHandle {
    /// Signals the loop and waits for it to stop.
    pub async fn shutdown(self) {
        // The loop also stops when every receiver is gone.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Background sync task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct Engine {
    store: LocalStore,
    queue: SyncQueue,
    coordinator: Option<Arc<SyncCoordinator>>,
    background: Mutex<Option<BackgroundHandle>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("sync_configured", &self.coordinator.is_some())
            .finish()
    }
}

impl Engine {
    /// Opens the configured store, runs pending migrations and the integrity
    /// check. A store that fails the check is recreated when
    /// `reset_on_corruption` is set and reported as unavailable otherwise.
    ///
    /// Sync is wired up only when both `sync.server_url` and `sync.api_key`
    /// are present; without them the queue still fills but cannot drain.
    pub async fn initialize(config: &Config) -> Result<Self, SyncError> {
        let store = open_verified(&config.database_path.value, config.reset_on_corruption).await?;

        let remote: Option<Arc<dyn RemotePush>> = if config.sync.is_configured() {
            Some(Arc::new(HttpRemote::from_config(&config.sync)?))
        } else {
            tracing::info!("Sync not configured, changes will stay queued");
            None
        };

        let engine = Self::new(store, remote, config);
        if config.sync.auto_drain {
            match engine.spawn_background() {
                Ok(handle) => {
                    *engine
                        .background
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                }
                Err(e) => tracing::warn!(error = %e, "Auto drain not started"),
            }
        }
        Ok(engine)
    }

    /// Builds an engine over an already opened store and any
    /// [`RemotePush`] implementation.
    pub fn new(store: LocalStore, remote: Option<Arc<dyn RemotePush>>, config: &Config) -> Self {
        let policy = RetryPolicy::from_config(&config.retry);
        let queue = SyncQueue::new(store.clone(), policy);
        let coordinator = remote.map(|remote| {
            Arc::new(
                SyncCoordinator::new(
                    store.clone(),
                    remote,
                    policy,
                    CoordinatorOptions::from_config(&config.sync),
                )
                .with_breaker(CircuitBreaker::from_config(&config.retry)),
            )
        });

        Self {
            store,
            queue,
            coordinator,
            background: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn is_sync_configured(&self) -> bool {
        self.coordinator.is_some()
    }

    fn coordinator(&self) -> Result<&Arc<SyncCoordinator>, SyncError> {
        self.coordinator.as_ref().ok_or_else(|| {
            SyncError::Configuration("add sync.server_url and sync.api_key to config".to_string())
        })
    }

    /// Number of queue entries not yet synchronized, whatever their state.
    pub async fn pending_count(&self) -> Result<i64, SyncError> {
        Ok(self.queue.pending_count().await?)
    }

    pub async fn stats(&self) -> Result<QueueStats, SyncError> {
        Ok(self.queue.stats().await?)
    }

    pub async fn needing_attention(&self) -> Result<Vec<QueueEntry>, SyncError> {
        Ok(self.queue.needing_attention().await?)
    }

    /// Drops a needs-attention or rejected entry without pushing it.
    pub async fn dismiss(&self, entity_type: EntityType, entity_id: &str) -> Result<bool, SyncError> {
        Ok(self.queue.dismiss(entity_type, entity_id).await?)
    }

    pub async fn retry_now(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<EntryOutcome, SyncError> {
        self.coordinator()?.retry_now(entity_type, entity_id).await
    }

    pub async fn drain_once(&self) -> Result<DrainReport, SyncError> {
        self.coordinator()?.drain_once().await
    }

    pub fn breaker_state(&self) -> Option<BreakerState> {
        self.coordinator.as_ref().map(|c| c.breaker_state())
    }

    /// Starts the drain loop on the current runtime.
    pub fn spawn_background(&self) -> Result<BackgroundHandle, SyncError> {
        let coordinator = Arc::clone(self.coordinator()?);
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(async move { coordinator.run(rx).await });
        Ok(BackgroundHandle { shutdown, task })
    }

    /// Wipes every table and recreates the schema. Unsynced data is lost.
    pub async fn reset(&self) -> Result<SchemaVersion, SyncError> {
        Ok(self.store.reset().await?)
    }

    pub async fn check_integrity(&self) -> Result<bool, SyncError> {
        Ok(self.store.check_integrity().await?)
    }

    pub async fn schema_version(&self) -> Result<SchemaVersion, SyncError> {
        Ok(self.store.schema_version().await?)
    }

    /// Stops the auto drain loop, if any, then closes the store.
    pub async fn close(&self) {
        let background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = background {
            handle.shutdown().await;
        }
        self.store.close().await;
    }

    pub fn time_records(&self) -> TimeRecordRepository {
        TimeRecordRepository::new(self.store.clone())
    }

    pub fn location_records(&self) -> LocationRecordRepository {
        LocationRecordRepository::new(self.store.clone())
    }

    pub fn photos(&self) -> PhotoRepository {
        PhotoRepository::new(self.store.clone())
    }

    pub fn activity_reports(&self) -> ActivityReportRepository {
        ActivityReportRepository::new(self.store.clone())
    }

    pub fn verifications(&self) -> CheckpointVerificationRepository {
        CheckpointVerificationRepository::new(self.store.clone())
    }

    pub fn patrol_locations(&self) -> PatrolLocationRepository {
        PatrolLocationRepository::new(self.store.clone())
    }

    pub fn checkpoints(&self) -> CheckpointRepository {
        CheckpointRepository::new(self.store.clone())
    }

    pub fn users(&self) -> UserRepository {
        UserRepository::new(self.store.clone())
    }
}

async fn open_verified(path: &Path, reset_on_corruption: bool) -> Result<LocalStore, StoreError> {
    let store = LocalStore::open(path);
    let problem = match store.check_integrity().await {
        Ok(true) => return Ok(store),
        Ok(false) => "integrity check failed".to_string(),
        Err(StoreError::Unavailable(reason)) => reason,
        Err(e) => return Err(e),
    };

    if !reset_on_corruption {
        return Err(StoreError::Unavailable(format!(
            "{}; reset the store to continue",
            problem
        )));
    }

    tracing::warn!(path = %path.display(), problem = %problem, "Recreating corrupt store");
    store.close().await;
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Unavailable(format!(
                    "cannot remove '{}': {}",
                    Path::new(&file).display(),
                    e
                )))
            }
        }
    }

    let store = LocalStore::open(path);
    store.acquire().await?;
    Ok(store)
}
