//! Durable outbound queue.
//!
//! One row per `(entity_type, entity_id)`. Rows are created when an entity
//! is written, updated on each failed attempt and deleted on success or on
//! explicit dismissal. Rows that exhaust their retries or are rejected by
//! the backend stay in the table, surfaced through [`SyncQueue::needing_attention`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

use super::{EntityType, RetryPolicy};
use crate::db::repository::{format_timestamp, parse_timestamp};
use crate::db::LocalStore;
use crate::error::StoreError;

const TABLE: &str = "sync_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    NeedsAttention,
    Rejected,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::NeedsAttention => "needs_attention",
            QueueStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "needs_attention" => Ok(QueueStatus::NeedsAttention),
            "rejected" => Ok(QueueStatus::Rejected),
            _ => Err(format!("unknown queue status '{}'", s)),
        }
    }
}

/// A row of the sync queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub priority: i64,
    pub retry_count: i64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    /// Bumped each time the entry is re-enqueued. A push only settles the
    /// entry when the generation it read is still current.
    pub generation: i64,
}

#[derive(Debug, FromRow)]
struct QueueRow {
    id: i64,
    entity_type: String,
    entity_id: String,
    priority: i64,
    retry_count: i64,
    last_attempt: Option<String>,
    error_message: Option<String>,
    status: String,
    created_at: String,
    generation: i64,
}

impl TryFrom<QueueRow> for QueueEntry {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        Ok(QueueEntry {
            id: row.id,
            entity_type: row
                .entity_type
                .parse()
                .map_err(|e: String| StoreError::decode(TABLE, e))?,
            entity_id: row.entity_id,
            priority: row.priority,
            retry_count: row.retry_count,
            last_attempt: row
                .last_attempt
                .as_deref()
                .map(|value| parse_timestamp(TABLE, value))
                .transpose()?,
            error_message: row.error_message,
            status: row
                .status
                .parse()
                .map_err(|e: String| StoreError::decode(TABLE, e))?,
            created_at: parse_timestamp(TABLE, &row.created_at)?,
            generation: row.generation,
        })
    }
}

fn decode_rows(rows: Vec<QueueRow>) -> Result<Vec<QueueEntry>, StoreError> {
    rows.into_iter().map(QueueEntry::try_from).collect()
}

fn failed(operation: &'static str, error: impl Into<StoreError>) -> StoreError {
    let error = error.into();
    tracing::error!(entity = TABLE, operation, error = %error, "Queue operation failed");
    error
}

/// Entry counts by persisted state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub needs_attention: i64,
    pub rejected: i64,
}

impl QueueStats {
    pub fn total(&self) -> i64 {
        self.pending + self.needs_attention + self.rejected
    }
}

/// Queues `entity_id` for push inside the caller's transaction.
///
/// Enqueueing a key that is already queued refreshes it: the priority is
/// raised to the larger of the two and the generation is bumped. A rejected
/// entry goes back to pending. Retry bookkeeping is left alone.
pub async fn enqueue_in(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: &str,
    priority: i64,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sync_queue (entity_type, entity_id, priority, retry_count, status, created_at)
        VALUES (?, ?, ?, 0, 'pending', ?)
        ON CONFLICT (entity_type, entity_id) DO UPDATE SET
            priority = MAX(priority, excluded.priority),
            generation = generation + 1,
            status = CASE WHEN status = 'rejected' THEN 'pending' ELSE status END
        "#,
    )
    .bind(entity_type.as_str())
    .bind(entity_id)
    .bind(priority)
    .bind(format_timestamp(&now))
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        tracing::error!(%entity_type, entity_id, error = %e, "Failed to enqueue");
        StoreError::from(e)
    })?;

    tracing::debug!(%entity_type, entity_id, priority, "Queued for sync");
    Ok(())
}

/// Deletes the queue row `id` inside the caller's transaction.
pub async fn remove_in(conn: &mut SqliteConnection, id: i64) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Deletes the queue row `id` only if it is still at `generation`.
/// Returns 0 when the entry was re-enqueued since it was read.
pub async fn remove_if_current_in(
    conn: &mut SqliteConnection,
    id: i64,
    generation: i64,
) -> Result<u64, StoreError> {
    let result = sqlx::query("DELETE FROM sync_queue WHERE id = ? AND generation = ?")
        .bind(id)
        .bind(generation)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Handle to the `sync_queue` table.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
    policy: RetryPolicy,
}

impl SyncQueue {
    pub fn new(store: LocalStore, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn pool(&self, operation: &'static str) -> Result<SqlitePool, StoreError> {
        self.store.acquire().await.map_err(|e| failed(operation, e))
    }

    pub async fn enqueue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        priority: i64,
    ) -> Result<(), StoreError> {
        let entity_id = entity_id.to_string();
        self.store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    enqueue_in(conn, entity_type, &entity_id, priority, Utc::now()).await
                })
            })
            .await
    }

    pub async fn get(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let pool = self.pool("get").await?;
        let row: Option<QueueRow> =
            sqlx::query_as("SELECT * FROM sync_queue WHERE entity_type = ? AND entity_id = ?")
                .bind(entity_type.as_str())
                .bind(entity_id)
                .fetch_optional(&pool)
                .await
                .map_err(|e| failed("get", e))?;
        row.map(QueueEntry::try_from).transpose()
    }

    /// Pending entries whose backoff has elapsed at `now`, in drain order:
    /// priority descending, never-attempted and oldest attempts first, then
    /// insertion order.
    pub async fn select_ready(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<QueueEntry>, StoreError> {
        let pool = self.pool("select_ready").await?;
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_queue
            WHERE status = 'pending'
            ORDER BY priority DESC, last_attempt ASC, id ASC
            "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| failed("select_ready", e))?;

        let ready = decode_rows(rows)?
            .into_iter()
            .filter(|entry| {
                self.policy
                    .is_eligible(entry.retry_count, entry.last_attempt, now)
            })
            .take(limit)
            .collect();
        Ok(ready)
    }

    /// Records a transient failure of entry `id`. Returns the resulting
    /// status: still pending, or needs-attention once retries are used up.
    pub async fn record_failure(
        &self,
        id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueStatus>, StoreError> {
        let error = error.to_string();
        let policy = self.policy;
        let now = format_timestamp(&now);

        self.store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let retry_count: Option<i64> = sqlx::query_scalar(
                        r#"
                        UPDATE sync_queue SET
                            retry_count = retry_count + 1,
                            last_attempt = CASE
                                WHEN last_attempt IS NULL OR last_attempt < ? THEN ?
                                ELSE last_attempt
                            END,
                            error_message = ?
                        WHERE id = ?
                        RETURNING retry_count
                        "#,
                    )
                    .bind(&now)
                    .bind(&now)
                    .bind(&error)
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;

                    let Some(retry_count) = retry_count else {
                        return Ok(None);
                    };

                    let status = if policy.is_exhausted(retry_count) {
                        QueueStatus::NeedsAttention
                    } else {
                        QueueStatus::Pending
                    };
                    sqlx::query("UPDATE sync_queue SET status = ? WHERE id = ?")
                        .bind(status.as_str())
                        .bind(id)
                        .execute(&mut *conn)
                        .await?;
                    Ok::<_, StoreError>(Some(status))
                })
            })
            .await
            .map_err(|e| failed("record_failure", e))
    }

    /// Marks entry `id` as permanently rejected by the backend. An entry
    /// re-enqueued since `generation` was read stays pending, as the rejected
    /// payload is no longer current.
    pub async fn mark_rejected(
        &self,
        id: i64,
        generation: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let error = error.to_string();
        let now = format_timestamp(&now);

        self.store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        UPDATE sync_queue SET
                            status = 'rejected',
                            error_message = ?,
                            last_attempt = CASE
                                WHEN last_attempt IS NULL OR last_attempt < ? THEN ?
                                ELSE last_attempt
                            END
                        WHERE id = ? AND generation = ?
                        "#,
                    )
                    .bind(&error)
                    .bind(&now)
                    .bind(&now)
                    .bind(id)
                    .bind(generation)
                    .execute(&mut *conn)
                    .await?;
                    Ok::<_, StoreError>(result.rows_affected())
                })
            })
            .await
            .map_err(|e| failed("mark_rejected", e))
    }

    pub async fn remove(&self, id: i64) -> Result<u64, StoreError> {
        self.store
            .run_in_transaction(move |conn| Box::pin(async move { remove_in(conn, id).await }))
            .await
            .map_err(|e| failed("remove", e))
    }

    /// Abandons a needs-attention or rejected entry. Pending entries are
    /// left alone. Returns whether a row was deleted.
    pub async fn dismiss(&self, entity_type: EntityType, entity_id: &str) -> Result<bool, StoreError> {
        let key = entity_id.to_string();
        let deleted = self
            .store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        DELETE FROM sync_queue
                        WHERE entity_type = ? AND entity_id = ?
                          AND status IN ('needs_attention', 'rejected')
                        "#,
                    )
                    .bind(entity_type.as_str())
                    .bind(&key)
                    .execute(&mut *conn)
                    .await?;
                    Ok::<_, StoreError>(result.rows_affected() > 0)
                })
            })
            .await
            .map_err(|e| failed("dismiss", e))?;

        if deleted {
            tracing::warn!(%entity_type, entity_id, "Queue entry dismissed");
        }
        Ok(deleted)
    }

    /// Entries that need a user decision: out of retries or rejected.
    pub async fn needing_attention(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let pool = self.pool("needing_attention").await?;
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            SELECT * FROM sync_queue
            WHERE status IN ('needs_attention', 'rejected')
            ORDER BY priority DESC, id ASC
            "#,
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| failed("needing_attention", e))?;
        decode_rows(rows)
    }

    pub async fn stats(&self) -> Result<QueueStats, StoreError> {
        let pool = self.pool("stats").await?;
        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM sync_queue GROUP BY status")
                .fetch_all(&pool)
                .await
                .map_err(|e| failed("stats", e))?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            match status.parse() {
                Ok(QueueStatus::Pending) => stats.pending = count,
                Ok(QueueStatus::NeedsAttention) => stats.needs_attention = count,
                Ok(QueueStatus::Rejected) => stats.rejected = count,
                Err(e) => tracing::warn!(error = %e, count, "Ignoring unknown queue status"),
            }
        }
        Ok(stats)
    }

    /// Every outstanding entry, whatever its state.
    pub async fn pending_count(&self) -> Result<i64, StoreError> {
        let pool = self.pool("pending_count").await?;
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&pool)
            .await
            .map_err(|e| failed("pending_count", e))?;
        Ok(count)
    }
}
