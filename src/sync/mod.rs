//! Outbound synchronization.
//!
//! Writes made through the tracked repository operations land in the
//! durable [`SyncQueue`]. The [`SyncCoordinator`] drains it through a
//! [`RemotePush`] implementation, ordering entries by priority, spacing
//! retries with the [`RetryPolicy`] backoff and backing off entirely while
//! the [`CircuitBreaker`] is open.
//!
//! ```no_run
//! # async fn demo() -> Result<(), fieldsync::sync::SyncError> {
//! use std::sync::Arc;
//! use fieldsync::db::LocalStore;
//! use fieldsync::sync::{CoordinatorOptions, HttpRemote, RetryPolicy, SyncCoordinator};
//!
//! let store = LocalStore::open("/tmp/fieldsync.db");
//! let remote = HttpRemote::new("https://ops.example.com", "api-key", std::time::Duration::from_secs(20))?;
//! let coordinator = SyncCoordinator::new(
//!     store,
//!     Arc::new(remote),
//!     RetryPolicy::default(),
//!     CoordinatorOptions::default(),
//! );
//! let report = coordinator.drain_once().await?;
//! println!("{} synced", report.synced);
//! # Ok(())
//! # }
//! ```

mod circuit;
pub mod coordinator;
mod entity_type;
mod policy;
pub mod queue;
pub mod remote;

pub use circuit::{BreakerState, CircuitBreaker};
pub use coordinator::{CoordinatorOptions, DrainReport, EntryOutcome, SyncCoordinator};
pub use entity_type::EntityType;
pub use policy::RetryPolicy;
pub use queue::{QueueEntry, QueueStats, QueueStatus, SyncQueue};
pub use remote::{HttpRemote, PushError, PushReceipt, RemotePush};

use thiserror::Error;

use crate::error::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Push failed, will retry: {0}")]
    Transient(String),

    #[error("Push rejected by server: {0}")]
    Rejected(String),

    #[error("{entity_type} {entity_id} is not queued for sync")]
    NotQueued {
        entity_type: EntityType,
        entity_id: String,
    },

    #[error("{entity_type} {entity_id} is already being pushed")]
    AlreadyInFlight {
        entity_type: EntityType,
        entity_id: String,
    },

    #[error("Sync not configured: {0}")]
    Configuration(String),
}

impl From<PushError> for SyncError {
    fn from(err: PushError) -> Self {
        match err {
            PushError::Transient(msg) => SyncError::Transient(msg),
            PushError::Rejected(msg) => SyncError::Rejected(msg),
        }
    }
}
