//! Local store: connection lifecycle, transactions and repositories.

mod activity_report_repo;
mod checkpoint_repo;
mod location_record_repo;
pub mod migrations;
mod patrol_location_repo;
mod photo_repo;
pub mod repository;
mod time_record_repo;
mod user_repo;
mod verification_repo;

pub use activity_report_repo::{ActivityReportCodec, ActivityReportRepository};
pub use checkpoint_repo::{CheckpointCodec, CheckpointRepository};
pub use location_record_repo::{LocationRecordCodec, LocationRecordRepository};
pub use migrations::{Migration, MigrationManager, SchemaVersion};
pub use patrol_location_repo::{PatrolLocationCodec, PatrolLocationRepository};
pub use photo_repo::{PhotoCodec, PhotoRepository};
pub use repository::{
    EntityCodec, Predicate, ReferenceData, RemoteApply, Repository, SqlValue, SyncTracked,
};
pub use time_record_repo::{TimeRecordCodec, TimeRecordRepository};
pub use user_repo::{UserCodec, UserRepository};
pub use verification_repo::{CheckpointVerificationCodec, CheckpointVerificationRepository};

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{Connection, SqliteConnection};
use tokio::sync::{Mutex, OnceCell};

use crate::error::StoreError;

tokio::task_local! {
    static IN_TRANSACTION: ();
}

/// Options used when the store is first acquired.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl StoreOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

struct StoreInner {
    options: StoreOptions,
    pool: OnceCell<SqlitePool>,
    write_lock: Mutex<()>,
    migrations: MigrationManager,
    closed: AtomicBool,
}

/// Handle to the embedded database.
///
/// The handle is cheap to clone; clones share one lazily opened pool, one
/// writer lock and one migration registry. There is no process-wide
/// instance: whoever opens the store owns it and passes it on.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("path", &self.inner.options.path)
            .field("initialized", &self.inner.pool.initialized())
            .finish()
    }
}

impl LocalStore {
    /// Creates a handle for the database at `path`. Nothing is opened until
    /// the first call to [`LocalStore::acquire`].
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::with_options(StoreOptions::new(path), MigrationManager::new())
    }

    pub fn with_options(options: StoreOptions, migrations: MigrationManager) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                options,
                pool: OnceCell::new(),
                write_lock: Mutex::new(()),
                migrations,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.options.path
    }

    /// Returns the shared pool, opening the database and applying pending
    /// migrations on first use. Concurrent first callers wait for the same
    /// initialization and receive the same pool.
    pub async fn acquire(&self) -> Result<SqlitePool, StoreError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StoreError::Unavailable("store is closed".to_string()));
        }

        let pool = self
            .inner
            .pool
            .get_or_try_init(|| self.initialize())
            .await
            .map_err(|e| {
                tracing::error!(
                    path = %self.inner.options.path.display(),
                    error = %e,
                    "Failed to open local store"
                );
                e
            })?;
        Ok(pool.clone())
    }

    async fn initialize(&self) -> Result<SqlitePool, StoreError> {
        let options = &self.inner.options;

        if let Some(parent) = options.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!(
                        "cannot create database directory '{}': {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db_url = format!("sqlite:{}?mode=rwc", options.path.display());
        let connect_options = SqliteConnectOptions::from_str(&db_url)?
            .foreign_keys(true)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let _guard = self.inner.write_lock.lock().await;
        let mut conn = pool.acquire().await?;
        let current = migrations::read_version(&mut conn).await?;
        let version = self
            .inner
            .migrations
            .apply_migrations(&mut conn, current)
            .await?;

        tracing::info!(
            path = %options.path.display(),
            %version,
            "Local store ready"
        );

        Ok(pool)
    }

    /// Runs `action` inside a single transaction.
    ///
    /// Commits when the action returns `Ok` and rolls back when it returns
    /// `Err`, handing the action's error back to the caller. Writers are
    /// serialized: concurrent calls wait for each other. Calling this from
    /// inside an action returns [`StoreError::NestedTransaction`].
    ///
    /// The returned future is boxed so callers stay `Send` and can be
    /// spawned onto the runtime.
    pub fn run_in_transaction<'a, T, E, F>(&'a self, action: F) -> BoxFuture<'a, Result<T, E>>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>> + Send + 'a,
        T: Send + 'a,
        E: From<StoreError> + std::fmt::Display + Send + 'a,
    {
        Box::pin(self.transaction(action))
    }

    async fn transaction<T, E, F>(&self, action: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>> + Send,
        T: Send,
        E: From<StoreError> + std::fmt::Display + Send,
    {
        if IN_TRANSACTION.try_with(|_| ()).is_ok() {
            return Err(StoreError::NestedTransaction.into());
        }

        let pool = self.acquire().await?;
        IN_TRANSACTION
            .scope((), async move {
                let _guard = self.inner.write_lock.lock().await;
                let mut tx = pool.begin().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to begin transaction");
                    StoreError::from(e)
                })?;

                let outcome = action(&mut *tx).await;
                match outcome {
                    Ok(value) => {
                        tx.commit().await.map_err(|e| {
                            tracing::error!(error = %e, "Failed to commit transaction");
                            StoreError::from(e)
                        })?;
                        Ok(value)
                    }
                    Err(e) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            tracing::warn!(error = %rollback_err, "Rollback failed");
                        }
                        tracing::debug!(error = %e, "Transaction rolled back");
                        Err(e)
                    }
                }
            })
            .await
    }

    /// Drops every table and recreates the schema from version 0.
    pub async fn reset(&self) -> Result<SchemaVersion, StoreError> {
        let pool = self.acquire().await?;
        let _guard = self.inner.write_lock.lock().await;
        let mut conn = pool.acquire().await?;

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&mut *conn)
        .await?;

        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await?;

        let dropped = async {
            let mut tx = conn.begin().await?;
            for table in &tables {
                sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", table))
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await
        }
        .await;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await?;
        dropped?;

        tracing::warn!(tables = tables.len(), "Local store reset");

        let current = migrations::read_version(&mut conn).await?;
        self.inner
            .migrations
            .apply_migrations(&mut conn, current)
            .await
    }

    /// Low-level consistency check. `Ok(false)` means the file is corrupt.
    pub async fn check_integrity(&self) -> Result<bool, StoreError> {
        let pool = self.acquire().await?;
        let results: Vec<String> = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_all(&pool)
            .await?;

        let ok = results.len() == 1 && results[0] == "ok";
        if !ok {
            tracing::error!(problems = ?results, "Integrity check failed");
        }
        Ok(ok)
    }

    /// Schema version recorded in the store.
    pub async fn schema_version(&self) -> Result<SchemaVersion, StoreError> {
        let pool = self.acquire().await?;
        let mut conn = pool.acquire().await?;
        Ok(migrations::read_version(&mut conn).await?)
    }

    /// Closes the pool. Later calls to [`LocalStore::acquire`] fail with
    /// [`StoreError::Unavailable`].
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(pool) = self.inner.pool.get() {
            pool.close().await;
            tracing::info!(path = %self.inner.options.path.display(), "Local store closed");
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::LocalStore;
    use tempfile::TempDir;

    pub struct TestStore {
        pub store: LocalStore,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    pub fn test_store() -> TestStore {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path().join("test.db"));
        TestStore {
            store,
            _temp_dir: temp_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::test_store;
    use super::*;

    async fn count_users(store: &LocalStore) -> i64 {
        let pool = store.acquire().await.unwrap();
        sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_acquire_creates_tables() {
        let ctx = test_store();
        let pool = ctx.store.acquire().await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for expected in [
            "activity_reports",
            "checkpoint_verifications",
            "checkpoints",
            "location_records",
            "patrol_locations",
            "photos",
            "schema_version",
            "sync_queue",
            "time_records",
            "users",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
        assert_eq!(
            ctx.store.schema_version().await.unwrap(),
            SchemaVersion::new(1, 1)
        );
    }

    #[tokio::test]
    async fn test_concurrent_acquire_initializes_once() {
        let ctx = test_store();
        let store = &ctx.store;

        let results = futures::future::join_all((0..8).map(|_| store.acquire())).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let versions: Vec<f64> = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_all(&store.acquire().await.unwrap())
            .await
            .unwrap();
        assert_eq!(versions, vec![1.1]);
    }

    #[tokio::test]
    async fn test_transaction_commits_on_success() {
        let ctx = test_store();
        let store = &ctx.store;

        let id: i64 = store
            .run_in_transaction(|conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        "INSERT INTO users (user_id, phone_number) VALUES ('u1', '555-0100')",
                    )
                    .execute(&mut *conn)
                    .await
                    .map_err(StoreError::from)?;
                    Ok::<_, StoreError>(result.last_insert_rowid())
                })
            })
            .await
            .unwrap();

        assert!(id > 0);
        assert_eq!(count_users(store).await, 1);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let ctx = test_store();
        let store = &ctx.store;
        let before = count_users(store).await;

        let result: Result<(), StoreError> = store
            .run_in_transaction(|conn| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO users (user_id, phone_number) VALUES ('u1', '555-0100')",
                    )
                    .execute(&mut *conn)
                    .await?;
                    Err::<(), _>(StoreError::Unavailable("simulated failure".into()))
                })
            })
            .await;

        match result {
            Err(StoreError::Unavailable(msg)) => assert_eq!(msg, "simulated failure"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(count_users(store).await, before);
    }

    #[tokio::test]
    async fn test_nested_transaction_is_rejected() {
        let ctx = test_store();
        let store = ctx.store.clone();
        let inner_store = store.clone();

        let result: Result<(), StoreError> = store
            .run_in_transaction(move |_conn| {
                Box::pin(async move {
                    inner_store
                        .run_in_transaction(|_conn| Box::pin(async { Ok::<_, StoreError>(()) }))
                        .await
                })
            })
            .await;

        assert!(matches!(result, Err(StoreError::NestedTransaction)));
    }

    #[tokio::test]
    async fn test_concurrent_writers_are_serialized() {
        let ctx = test_store();
        let store = &ctx.store;

        let writes = (0..10).map(|i| {
            store.run_in_transaction(move |conn| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO users (user_id, phone_number) VALUES (?, '555')")
                        .bind(format!("user-{i}"))
                        .execute(&mut *conn)
                        .await?;
                    Ok::<_, StoreError>(())
                })
            })
        });
        let results = futures::future::join_all(writes).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(count_users(store).await, 10);
    }

    #[tokio::test]
    async fn test_reset_recreates_empty_schema() {
        let ctx = test_store();
        let store = &ctx.store;

        sqlx::query("INSERT INTO users (user_id, phone_number) VALUES ('u1', '555')")
            .execute(&store.acquire().await.unwrap())
            .await
            .unwrap();
        assert_eq!(count_users(store).await, 1);

        let version = store.reset().await.unwrap();
        assert_eq!(version, SchemaVersion::new(1, 1));
        assert_eq!(count_users(store).await, 0);
    }

    #[tokio::test]
    async fn test_integrity_check_passes_on_fresh_store() {
        let ctx = test_store();
        assert!(ctx.store.check_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let ctx = test_store();
        ctx.store.acquire().await.unwrap();
        ctx.store.close().await;

        let err = ctx.store.acquire().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
