//! Schema migrations.
//!
//! Migrations are tagged variants of [`Migration`]. The [`MigrationManager`]
//! sorts them by version and applies every step newer than the recorded
//! schema version. Each step runs in its own transaction together with the
//! version write, so an interrupted upgrade resumes from the last completed
//! step instead of starting over.

use std::fmt;

use sqlx::{Connection, SqliteConnection};

use crate::error::StoreError;

/// Schema version, persisted as a numeric `major.minor` value with a
/// single-digit minor part (`1.1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
}

impl SchemaVersion {
    pub const ZERO: SchemaVersion = SchemaVersion { major: 0, minor: 0 };

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn as_f64(&self) -> f64 {
        self.major as f64 + self.minor as f64 / 10.0
    }

    pub fn from_f64(value: f64) -> Self {
        let major = value.trunc();
        let minor = ((value - major) * 10.0).round();
        Self {
            major: major.max(0.0) as u32,
            minor: minor.max(0.0) as u32,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Tables that carry a `remote_id` assigned by the backend.
pub const ENTITY_TABLES: [&str; 7] = [
    "time_records",
    "location_records",
    "photos",
    "activity_reports",
    "patrol_locations",
    "checkpoints",
    "checkpoint_verifications",
];

const CREATE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL UNIQUE,
    phone_number TEXT NOT NULL,
    auth_token TEXT,
    token_expiry TEXT
);

CREATE TABLE IF NOT EXISTS time_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS location_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    accuracy REAL NOT NULL DEFAULT 0,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    file_path TEXT NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS activity_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    text TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS patrol_locations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    location_id INTEGER NOT NULL REFERENCES patrol_locations(id),
    name TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS checkpoint_verifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    checkpoint_id INTEGER NOT NULL REFERENCES checkpoints(id),
    timestamp TEXT NOT NULL,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    synced INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    retry_count INTEGER NOT NULL DEFAULT 0,
    last_attempt TEXT,
    error_message TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    UNIQUE (entity_type, entity_id)
);

CREATE INDEX IF NOT EXISTS idx_time_records_user ON time_records (user_id, timestamp);
CREATE INDEX IF NOT EXISTS idx_checkpoints_location ON checkpoints (location_id);
CREATE INDEX IF NOT EXISTS idx_verifications_checkpoint ON checkpoint_verifications (checkpoint_id);
CREATE INDEX IF NOT EXISTS idx_sync_queue_selection ON sync_queue (status, priority DESC, last_attempt);
"#;

/// A single schema change. Every variant is idempotent: applying it to a
/// schema that already contains its objects is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Migration {
    /// 1.0: every table and index.
    CreateSchema,
    /// 1.1: `remote_id` on every entity table, `sync_progress` on photos,
    /// `generation` on the sync queue.
    AddSyncColumns,
}

impl Migration {
    /// Every known migration, in registry order.
    pub const ALL: [Migration; 2] = [Migration::CreateSchema, Migration::AddSyncColumns];

    pub fn version(&self) -> SchemaVersion {
        match self {
            Migration::CreateSchema => SchemaVersion::new(1, 0),
            Migration::AddSyncColumns => SchemaVersion::new(1, 1),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Migration::CreateSchema => "create schema objects",
            Migration::AddSyncColumns => "add remote_id, sync_progress and queue generation columns",
        }
    }

    pub async fn apply(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        match self {
            Migration::CreateSchema => {
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(CREATE_SCHEMA_SQL)).await?;
            }
            Migration::AddSyncColumns => {
                for table in ENTITY_TABLES {
                    add_column_if_missing(conn, table, "remote_id", "TEXT DEFAULT NULL").await?;
                }
                add_column_if_missing(
                    conn,
                    "photos",
                    "sync_progress",
                    "INTEGER NOT NULL DEFAULT 0",
                )
                .await?;
                add_column_if_missing(
                    conn,
                    "sync_queue",
                    "generation",
                    "INTEGER NOT NULL DEFAULT 0",
                )
                .await?;
            }
        }
        Ok(())
    }
}

/// Returns true if `table` has a column named `column`.
pub async fn column_exists(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
) -> Result<bool, sqlx::Error> {
    let columns: Vec<(String,)> =
        sqlx::query_as(&format!("SELECT name FROM pragma_table_info('{}')", table))
            .fetch_all(&mut *conn)
            .await?;
    Ok(columns.iter().any(|(name,)| name == column))
}

async fn add_column_if_missing(
    conn: &mut SqliteConnection,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), sqlx::Error> {
    if column_exists(conn, table, column).await? {
        tracing::debug!(table, column, "Column already present, skipping");
        return Ok(());
    }
    sqlx::query(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table, column, definition
    ))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Reads the recorded schema version, creating the version table if needed.
/// A store that never recorded a version is at `0.0`.
pub async fn read_version(conn: &mut SqliteConnection) -> Result<SchemaVersion, sqlx::Error> {
    ensure_version_table(conn).await?;

    let version: Option<f64> =
        sqlx::query_scalar("SELECT version FROM schema_version WHERE id = 1")
            .fetch_optional(&mut *conn)
            .await?;

    Ok(version.map(SchemaVersion::from_f64).unwrap_or_default())
}

async fn ensure_version_table(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version REAL NOT NULL
        )",
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Records `version`. The recorded version never goes down.
async fn write_version(
    conn: &mut SqliteConnection,
    version: SchemaVersion,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO schema_version (id, version) VALUES (1, ?)
         ON CONFLICT(id) DO UPDATE SET version = MAX(version, excluded.version)",
    )
    .bind(version.as_f64())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Ordered registry of migrations.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    migrations: Vec<Migration>,
}

impl MigrationManager {
    /// Registry with every known migration.
    pub fn new() -> Self {
        Self::with_migrations(Migration::ALL.to_vec())
    }

    pub fn with_migrations(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version());
        migrations.dedup_by_key(|m| m.version());
        Self { migrations }
    }

    /// Highest registered version, `0.0` for an empty registry.
    pub fn latest(&self) -> SchemaVersion {
        self.migrations
            .last()
            .map(|m| m.version())
            .unwrap_or_default()
    }

    /// Migrations newer than `current`, ascending.
    pub fn pending(&self, current: SchemaVersion) -> impl Iterator<Item = &Migration> {
        self.migrations
            .iter()
            .filter(move |m| m.version() > current)
    }

    /// Applies every migration newer than both `current` and the version
    /// recorded in the store, and returns the version reached. A no-op when
    /// the store is already at or past the latest registered version.
    pub async fn apply_migrations(
        &self,
        conn: &mut SqliteConnection,
        current: SchemaVersion,
    ) -> Result<SchemaVersion, StoreError> {
        let recorded = read_version(conn)
            .await
            .map_err(|source| StoreError::Migration {
                version: self.latest(),
                source,
            })?;
        if recorded > current {
            tracing::debug!(%current, %recorded, "Store already past requested version");
        }
        let current = current.max(recorded);
        let mut version = current;

        for migration in self.pending(current) {
            let target = migration.version();
            tracing::info!(
                from = %version,
                to = %target,
                "Applying migration: {}",
                migration.description()
            );

            let step = async {
                let mut tx = conn.begin().await?;
                migration.apply(&mut tx).await?;
                write_version(&mut tx, target).await?;
                tx.commit().await
            };

            if let Err(source) = step.await {
                tracing::error!(version = %target, error = %source, "Migration failed");
                return Err(StoreError::Migration {
                    version: target,
                    source,
                });
            }

            version = target;
        }

        Ok(version)
    }
}

impl Default for MigrationManager {
    fn default() -> Self {
        Self::new()
    }
}
