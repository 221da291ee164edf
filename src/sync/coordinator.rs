//! Drains the sync queue through a [`RemotePush`].
//!
//! An attempt reads the entity, pushes it and only then writes the outcome,
//! in a single transaction. Dropping an attempt before the push returns
//! leaves the queue exactly as it was.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use sqlx::SqliteConnection;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::queue::{self, QueueEntry, QueueStatus, SyncQueue};
use super::{BreakerState, CircuitBreaker, EntityType, PushError, RemotePush, RetryPolicy, SyncError};
use crate::config::SyncConfig;
use crate::db::{
    ActivityReportRepository, CheckpointVerificationRepository, LocalStore,
    LocationRecordRepository, PhotoRepository, TimeRecordRepository,
};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorOptions {
    pub push_timeout: Duration,
    pub batch_size: usize,
    pub drain_interval: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            push_timeout: Duration::from_secs(20),
            batch_size: 25,
            drain_interval: Duration::from_secs(30),
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            push_timeout: Duration::from_secs(config.push_timeout_secs),
            batch_size: config.batch_size.max(1),
            drain_interval: Duration::from_secs(config.drain_interval_secs.max(1)),
        }
    }
}

/// What happened to one queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Synced { remote_id: String },
    /// Pushed, but the entity was edited while the push was in flight. The
    /// remote id is kept and the entry stays queued for the newer version.
    Superseded { remote_id: String },
    /// Transient failure, will be retried after backoff.
    Retrying { retry_count: i64, error: String },
    /// Transient failure that used up the last retry.
    NeedsAttention { error: String },
    Rejected { reason: String },
    /// The source row is gone; the queue entry was dropped.
    Orphaned,
}

impl EntryOutcome {
    fn was_pushed(&self) -> bool {
        !matches!(self, EntryOutcome::Orphaned)
    }
}

/// Counts from one pass over the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub synced: usize,
    pub superseded: usize,
    pub retrying: usize,
    pub needs_attention: usize,
    pub rejected: usize,
    pub orphaned: usize,
    /// Entries already being pushed by another caller.
    pub skipped: usize,
    /// Entries left for later because the circuit breaker is open.
    pub deferred: usize,
    pub errors: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Synced { .. } => self.synced += 1,
            EntryOutcome::Superseded { .. } => self.superseded += 1,
            EntryOutcome::Retrying { .. } => self.retrying += 1,
            EntryOutcome::NeedsAttention { .. } => self.needs_attention += 1,
            EntryOutcome::Rejected { .. } => self.rejected += 1,
            EntryOutcome::Orphaned => self.orphaned += 1,
        }
    }

    pub fn attempted(&self) -> usize {
        self.synced + self.superseded + self.retrying + self.needs_attention + self.rejected
    }

    pub fn is_empty(&self) -> bool {
        *self == DrainReport::default()
    }
}

type InFlightKey = (EntityType, String);

/// Removes its key from the in-flight set when dropped.
struct InFlightClaim<'a> {
    set: &'a Mutex<HashSet<InFlightKey>>,
    key: InFlightKey,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

async fn load_payload(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    id: i64,
) -> Result<Option<Value>, StoreError> {
    match entity_type {
        EntityType::TimeRecord => TimeRecordRepository::payload_in(conn, id).await,
        EntityType::LocationRecord => LocationRecordRepository::payload_in(conn, id).await,
        EntityType::Photo => PhotoRepository::payload_in(conn, id).await,
        EntityType::ActivityReport => ActivityReportRepository::payload_in(conn, id).await,
        EntityType::CheckpointVerification => {
            CheckpointVerificationRepository::payload_in(conn, id).await
        }
    }
}

async fn mark_synced_in(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    id: i64,
    remote_id: &str,
) -> Result<u64, StoreError> {
    match entity_type {
        EntityType::TimeRecord => TimeRecordRepository::mark_synced_in(conn, id, remote_id).await,
        EntityType::LocationRecord => {
            LocationRecordRepository::mark_synced_in(conn, id, remote_id).await
        }
        EntityType::Photo => PhotoRepository::mark_synced_in(conn, id, remote_id).await,
        EntityType::ActivityReport => {
            ActivityReportRepository::mark_synced_in(conn, id, remote_id).await
        }
        EntityType::CheckpointVerification => {
            CheckpointVerificationRepository::mark_synced_in(conn, id, remote_id).await
        }
    }
}

async fn record_remote_id_in(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    id: i64,
    remote_id: &str,
) -> Result<u64, StoreError> {
    match entity_type {
        EntityType::TimeRecord => {
            TimeRecordRepository::record_remote_id_in(conn, id, remote_id).await
        }
        EntityType::LocationRecord => {
            LocationRecordRepository::record_remote_id_in(conn, id, remote_id).await
        }
        EntityType::Photo => PhotoRepository::record_remote_id_in(conn, id, remote_id).await,
        EntityType::ActivityReport => {
            ActivityReportRepository::record_remote_id_in(conn, id, remote_id).await
        }
        EntityType::CheckpointVerification => {
            CheckpointVerificationRepository::record_remote_id_in(conn, id, remote_id).await
        }
    }
}

pub struct SyncCoordinator {
    store: LocalStore,
    queue: SyncQueue,
    remote: Arc<dyn RemotePush>,
    breaker: Mutex<CircuitBreaker>,
    in_flight: Mutex<HashSet<InFlightKey>>,
    options: CoordinatorOptions,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("store", &self.store)
            .field("options", &self.options)
            .finish()
    }
}

impl SyncCoordinator {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemotePush>,
        policy: RetryPolicy,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            queue: SyncQueue::new(store.clone(), policy),
            store,
            remote,
            breaker: Mutex::new(CircuitBreaker::new(5, chrono::Duration::seconds(120))),
            in_flight: Mutex::new(HashSet::new()),
            options,
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Mutex::new(breaker);
        self
    }

    pub fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker().state()
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, entity_type: EntityType, entity_id: &str) -> Option<InFlightClaim<'_>> {
        let key = (entity_type, entity_id.to_string());
        let mut set = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlightClaim {
            set: &self.in_flight,
            key,
        })
    }

    /// One pass over the entries that are due, in priority order. A failure
    /// of one entry never stops the others; only a store that has become
    /// unusable ends the pass early.
    pub async fn drain_once(&self) -> Result<DrainReport, SyncError> {
        let entries = self
            .queue
            .select_ready(Utc::now(), self.options.batch_size)
            .await?;
        let total = entries.len();
        let mut report = DrainReport::default();

        for (index, entry) in entries.into_iter().enumerate() {
            let Some(_claim) = self.claim(entry.entity_type, &entry.entity_id) else {
                report.skipped += 1;
                continue;
            };

            if !self.breaker().allow(Utc::now()) {
                report.deferred = total - index;
                tracing::warn!(deferred = report.deferred, "Circuit open, deferring sync");
                break;
            }

            let outcome = self.attempt(&entry).await;
            if !matches!(&outcome, Ok(o) if o.was_pushed()) {
                self.breaker().release_trial();
            }

            match outcome {
                Ok(outcome) => report.record(&outcome),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        entity = %entry.entity_type,
                        entity_id = %entry.entity_id,
                        error = %e,
                        "Sync attempt failed"
                    );
                }
            }
        }

        Ok(report)
    }

    /// Pushes one entry now, ignoring backoff and the circuit breaker.
    pub async fn retry_now(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<EntryOutcome, SyncError> {
        let entry = self
            .queue
            .get(entity_type, entity_id)
            .await?
            .ok_or_else(|| SyncError::NotQueued {
                entity_type,
                entity_id: entity_id.to_string(),
            })?;

        let _claim =
            self.claim(entity_type, entity_id)
                .ok_or_else(|| SyncError::AlreadyInFlight {
                    entity_type,
                    entity_id: entity_id.to_string(),
                })?;

        tracing::info!(
            entity = %entity_type,
            entity_id,
            retry_count = entry.retry_count,
            status = %entry.status,
            "Manual retry"
        );

        match self.attempt(&entry).await? {
            EntryOutcome::Retrying { error, .. } | EntryOutcome::NeedsAttention { error } => {
                Err(SyncError::Transient(error))
            }
            EntryOutcome::Rejected { reason } => Err(SyncError::Rejected(reason)),
            outcome => Ok(outcome),
        }
    }

    async fn attempt(&self, entry: &QueueEntry) -> Result<EntryOutcome, StoreError> {
        let Ok(local_id) = entry.entity_id.parse::<i64>() else {
            return self.drop_orphan(entry, "entity id is not a local id").await;
        };

        let payload = {
            let pool = self.store.acquire().await?;
            let mut conn = pool.acquire().await?;
            load_payload(&mut conn, entry.entity_type, local_id).await?
        };
        let Some(payload) = payload else {
            return self.drop_orphan(entry, "source row no longer exists").await;
        };

        tracing::debug!(
            entity = %entry.entity_type,
            entity_id = %entry.entity_id,
            retry_count = entry.retry_count,
            "Pushing"
        );

        let timeout = self.options.push_timeout;
        let pushed = tokio::time::timeout(timeout, self.remote.push(entry.entity_type, &payload))
            .await
            .unwrap_or_else(|_| {
                Err(PushError::Transient(format!(
                    "push timed out after {}s",
                    timeout.as_secs_f32()
                )))
            });
        let now = Utc::now();

        match pushed {
            Ok(receipt) => {
                let entity_type = entry.entity_type;
                let queue_id = entry.id;
                let generation = entry.generation;
                let remote_id = receipt.remote_id.clone();
                let current = self
                    .store
                    .run_in_transaction(move |conn| {
                        Box::pin(async move {
                            if queue::remove_if_current_in(conn, queue_id, generation).await? == 0 {
                                record_remote_id_in(conn, entity_type, local_id, &remote_id).await?;
                                return Ok(false);
                            }
                            mark_synced_in(conn, entity_type, local_id, &remote_id).await?;
                            Ok::<_, StoreError>(true)
                        })
                    })
                    .await?;
                self.breaker().record_success();

                if !current {
                    tracing::info!(
                        entity = %entry.entity_type,
                        entity_id = %entry.entity_id,
                        remote_id = %receipt.remote_id,
                        "Edited during push, kept queued"
                    );
                    return Ok(EntryOutcome::Superseded {
                        remote_id: receipt.remote_id,
                    });
                }

                tracing::info!(
                    entity = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    remote_id = %receipt.remote_id,
                    "Synced"
                );
                Ok(EntryOutcome::Synced {
                    remote_id: receipt.remote_id,
                })
            }
            Err(PushError::Rejected(reason)) => {
                self.queue
                    .mark_rejected(entry.id, entry.generation, &reason, now)
                    .await?;
                // The backend answered, so it is reachable.
                self.breaker().record_success();

                tracing::warn!(
                    entity = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    reason = %reason,
                    "Push rejected"
                );
                Ok(EntryOutcome::Rejected { reason })
            }
            Err(PushError::Transient(error)) => {
                let status = self.queue.record_failure(entry.id, &error, now).await?;
                self.breaker().record_failure(now);

                let retry_count = entry.retry_count + 1;
                match status {
                    Some(QueueStatus::NeedsAttention) => {
                        tracing::warn!(
                            entity = %entry.entity_type,
                            entity_id = %entry.entity_id,
                            retry_count,
                            error = %error,
                            "Retries exhausted, entry needs attention"
                        );
                        Ok(EntryOutcome::NeedsAttention { error })
                    }
                    Some(_) => {
                        tracing::info!(
                            entity = %entry.entity_type,
                            entity_id = %entry.entity_id,
                            retry_count,
                            error = %error,
                            "Push failed, will retry"
                        );
                        Ok(EntryOutcome::Retrying { retry_count, error })
                    }
                    // Dismissed while the push was in flight.
                    None => Ok(EntryOutcome::Orphaned),
                }
            }
        }
    }

    async fn drop_orphan(
        &self,
        entry: &QueueEntry,
        reason: &str,
    ) -> Result<EntryOutcome, StoreError> {
        self.queue.remove(entry.id).await?;
        tracing::warn!(
            entity = %entry.entity_type,
            entity_id = %entry.entity_id,
            reason,
            "Dropped queue entry without source"
        );
        Ok(EntryOutcome::Orphaned)
    }

    /// Background drain loop. Drains every `drain_interval` until
    /// `shutdown` turns true or its sender is dropped. A drain in progress
    /// is abandoned at shutdown; its pending push is simply retried later.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.options.drain_interval.as_secs(),
            "Background sync started"
        );

        let mut ticker = tokio::time::interval(self.options.drain_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                result = async {
                    ticker.tick().await;
                    self.drain_once().await
                } => {
                    match result {
                        Ok(report) if report.is_empty() => {}
                        Ok(report) => tracing::info!(
                            synced = report.synced,
                            superseded = report.superseded,
                            retrying = report.retrying,
                            needs_attention = report.needs_attention,
                            rejected = report.rejected,
                            deferred = report.deferred,
                            "Drain finished"
                        ),
                        Err(SyncError::Store(e)) if e.is_fatal() => {
                            tracing::error!(error = %e, "Store unusable, stopping background sync");
                            break;
                        }
                        Err(e) => tracing::warn!(error = %e, "Drain failed"),
                    }
                }
            }
        }

        tracing::info!("Background sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_store;
    use crate::db::{Predicate, Repository, SyncTracked, TimeRecordCodec};
    use crate::models::{ActivityReport, LocationRecord, Photo, TimeRecord, TimeRecordType};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::super::PushReceipt;

    /// Plays back scripted results, then succeeds with generated ids.
    #[derive(Default)]
    struct ScriptedRemote {
        script: Mutex<VecDeque<Result<PushReceipt, PushError>>>,
        calls: Mutex<Vec<EntityType>>,
        counter: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedRemote {
        fn with_script(results: Vec<Result<PushReceipt, PushError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(results.into()),
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<EntityType> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemotePush for ScriptedRemote {
        async fn push(
            &self,
            entity_type: EntityType,
            _payload: &Value,
        ) -> Result<PushReceipt, PushError> {
            self.calls.lock().unwrap().push(entity_type);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self.script.lock().unwrap().pop_front();
            scripted.unwrap_or_else(|| {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                Ok(PushReceipt {
                    remote_id: format!("remote-{n}"),
                })
            })
        }
    }

    fn transient(msg: &str) -> Result<PushReceipt, PushError> {
        Err(PushError::Transient(msg.to_string()))
    }

    fn coordinator(store: &LocalStore, remote: Arc<ScriptedRemote>, max_retries: u32) -> SyncCoordinator {
        SyncCoordinator::new(
            store.clone(),
            remote,
            RetryPolicy {
                max_retries,
                ..RetryPolicy::default()
            },
            CoordinatorOptions {
                push_timeout: Duration::from_millis(200),
                batch_size: 25,
                drain_interval: Duration::from_millis(20),
            },
        )
    }

    async fn clock_in(store: &LocalStore, user: &str) -> i64 {
        TimeRecordRepository::new(store.clone())
            .insert_tracked(&TimeRecord::new(user, TimeRecordType::ClockIn, 1.0, 2.0))
            .await
            .unwrap()
    }

    async fn assert_synced_implies_remote_id<C: SyncTracked>(store: &LocalStore) {
        let synced = Repository::<C>::new(store.clone())
            .get_by_predicate(&Predicate::new().eq("synced", true))
            .await
            .unwrap();
        let with_remote = Repository::<C>::new(store.clone())
            .get_by_predicate(&Predicate::new().eq("synced", true).is_not_null("remote_id"))
            .await
            .unwrap();
        assert_eq!(synced.len(), with_remote.len());
    }

    #[tokio::test]
    async fn test_drain_pushes_in_priority_order_and_marks_synced() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);

        let location_id = LocationRecordRepository::new(ctx.store.clone())
            .insert_tracked(&LocationRecord::new("u1", 1.0, 2.0, 5.0))
            .await
            .unwrap();
        let photo_id = PhotoRepository::new(ctx.store.clone())
            .insert_tracked(&Photo::new("u1", "/tmp/p.jpg", 1.0, 2.0))
            .await
            .unwrap();
        let record_id = clock_in(&ctx.store, "u1").await;

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.synced, 3);
        assert_eq!(
            remote.calls(),
            vec![
                EntityType::TimeRecord,
                EntityType::Photo,
                EntityType::LocationRecord
            ]
        );

        let record = TimeRecordRepository::new(ctx.store.clone())
            .get_by_id(record_id)
            .await
            .unwrap()
            .unwrap();
        assert!(record.synced);
        assert!(record.remote_id.is_some());

        let photo = PhotoRepository::new(ctx.store.clone())
            .get_by_id(photo_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(photo.sync_progress, 100);

        let location = LocationRecordRepository::new(ctx.store.clone())
            .get_by_id(location_id)
            .await
            .unwrap()
            .unwrap();
        assert!(location.synced);

        assert_eq!(coordinator.queue().pending_count().await.unwrap(), 0);
        assert_synced_implies_remote_id::<TimeRecordCodec>(&ctx.store).await;
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![transient("503")]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);
        let id = clock_in(&ctx.store, "u1").await;

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.retrying, 1);

        let entry = coordinator
            .queue()
            .get(EntityType::TimeRecord, &id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.error_message.as_deref(), Some("503"));

        let record = TimeRecordRepository::new(ctx.store.clone())
            .get_by_id(id)
            .await
            .unwrap()
            .unwrap();
        assert!(!record.synced);
        assert!(record.remote_id.is_none());

        // Still inside the backoff window.
        let report = coordinator.drain_once().await.unwrap();
        assert!(report.is_empty());
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_batch() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![transient("reset by peer")]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);

        clock_in(&ctx.store, "u1").await;
        clock_in(&ctx.store, "u2").await;

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.retrying, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(coordinator.queue().pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![Err(PushError::Rejected(
            "422 missing text".to_string(),
        ))]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);
        ActivityReportRepository::new(ctx.store.clone())
            .insert_tracked(&ActivityReport::new("u1", "", 0.0, 0.0))
            .await
            .unwrap();

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.rejected, 1);

        let surfaced = coordinator.queue().needing_attention().await.unwrap();
        assert_eq!(surfaced.len(), 1);
        assert_eq!(surfaced[0].status, QueueStatus::Rejected);

        coordinator.drain_once().await.unwrap();
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_entry_needs_attention_until_manual_retry() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![transient("offline")]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 1);
        let id = clock_in(&ctx.store, "u1").await;

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.needs_attention, 1);
        assert_eq!(coordinator.queue().pending_count().await.unwrap(), 1);

        let outcome = coordinator
            .retry_now(EntityType::TimeRecord, &id.to_string())
            .await
            .unwrap();
        assert!(matches!(outcome, EntryOutcome::Synced { .. }));
        assert_eq!(coordinator.queue().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_now_ignores_backoff() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![transient("offline"), transient("offline")]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);
        let id = clock_in(&ctx.store, "u1").await.to_string();

        coordinator.drain_once().await.unwrap();
        let err = coordinator
            .retry_now(EntityType::TimeRecord, &id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transient(_)));

        let entry = coordinator
            .queue()
            .get(EntityType::TimeRecord, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.retry_count, 2);
        assert_eq!(remote.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_now_of_unknown_entry() {
        let ctx = test_store();
        let coordinator = coordinator(&ctx.store, ScriptedRemote::with_script(vec![]), 5);

        let err = coordinator
            .retry_now(EntityType::Photo, "404")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotQueued { .. }));
    }

    #[tokio::test]
    async fn test_deleted_source_drops_entry() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);
        let id = clock_in(&ctx.store, "u1").await;
        TimeRecordRepository::new(ctx.store.clone())
            .delete(id)
            .await
            .unwrap();

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.orphaned, 1);
        assert!(remote.calls().is_empty());
        assert_eq!(coordinator.queue().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_defers_rest_of_batch() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![
            transient("down"),
            transient("down"),
            transient("down"),
        ]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 5)
            .with_breaker(CircuitBreaker::new(2, chrono::Duration::seconds(120)));
        for user in ["u1", "u2", "u3"] {
            clock_in(&ctx.store, user).await;
        }

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.retrying, 2);
        assert_eq!(report.deferred, 1);
        assert!(matches!(coordinator.breaker_state(), BreakerState::Open { .. }));
        assert_eq!(remote.calls().len(), 2);

        let untouched = coordinator.queue().select_ready(Utc::now(), 10).await.unwrap();
        assert_eq!(untouched.len(), 1);
        assert_eq!(untouched[0].retry_count, 0);
    }

    #[tokio::test]
    async fn test_push_timeout_counts_as_transient() {
        let ctx = test_store();
        let remote = Arc::new(ScriptedRemote {
            delay: Some(Duration::from_secs(5)),
            ..ScriptedRemote::default()
        });
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);
        let id = clock_in(&ctx.store, "u1").await;

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.retrying, 1);

        let entry = coordinator
            .queue()
            .get(EntityType::TimeRecord, &id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(entry.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_entry_in_flight_is_not_pushed_twice() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![]);
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);
        let id = clock_in(&ctx.store, "u1").await.to_string();

        let _claim = coordinator.claim(EntityType::TimeRecord, &id).unwrap();

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.skipped, 1);
        let err = coordinator
            .retry_now(EntityType::TimeRecord, &id)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::AlreadyInFlight { .. }));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_attempt_leaves_entry_untouched() {
        let ctx = test_store();
        let remote = Arc::new(ScriptedRemote {
            delay: Some(Duration::from_millis(100)),
            ..ScriptedRemote::default()
        });
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);
        let id = clock_in(&ctx.store, "u1").await.to_string();

        let dropped =
            tokio::time::timeout(Duration::from_millis(10), coordinator.drain_once()).await;
        assert!(dropped.is_err());

        let entry = coordinator
            .queue()
            .get(EntityType::TimeRecord, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.retry_count, 0);
        assert!(entry.last_attempt.is_none());
        assert!(coordinator.claim(EntityType::TimeRecord, &id).is_some());
    }

    #[tokio::test]
    async fn test_edit_during_push_is_pushed_again() {
        let ctx = test_store();
        let remote = Arc::new(ScriptedRemote {
            delay: Some(Duration::from_millis(100)),
            ..ScriptedRemote::default()
        });
        let coordinator = coordinator(&ctx.store, remote.clone(), 5);
        let repo = TimeRecordRepository::new(ctx.store.clone());
        let id = clock_in(&ctx.store, "u1").await;

        let (report, _) = tokio::join!(coordinator.drain_once(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let mut record = repo.get_by_id(id).await.unwrap().unwrap();
            record.record_type = TimeRecordType::ClockOut;
            repo.update_tracked(&record).await.unwrap();
        });
        let report = report.unwrap();
        assert_eq!(report.superseded, 1);
        assert_eq!(report.synced, 0);

        assert_eq!(coordinator.queue().pending_count().await.unwrap(), 1);
        let record = repo.get_by_id(id).await.unwrap().unwrap();
        assert!(!record.synced);
        assert_eq!(record.remote_id.as_deref(), Some("remote-0"));
        assert_eq!(record.record_type, TimeRecordType::ClockOut);

        let report = coordinator.drain_once().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(remote.calls().len(), 2);
        assert_eq!(coordinator.queue().pending_count().await.unwrap(), 0);

        let record = repo.get_by_id(id).await.unwrap().unwrap();
        assert!(record.synced);
        assert_eq!(record.remote_id.as_deref(), Some("remote-0"));
        assert_synced_implies_remote_id::<TimeRecordCodec>(&ctx.store).await;
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let ctx = test_store();
        let remote = ScriptedRemote::with_script(vec![]);
        let coordinator = Arc::new(coordinator(&ctx.store, remote.clone(), 5));
        clock_in(&ctx.store, "u1").await;

        let (tx, rx) = watch::channel(false);
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(rx).await })
        };

        for _ in 0..100 {
            if coordinator.queue().pending_count().await.unwrap() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(coordinator.queue().pending_count().await.unwrap(), 0);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("loop did not stop")
            .unwrap();
    }
}
