//! Offline-first persistence and sync for field operations clients.
//!
//! Records captured in the field (time clock events, location pings,
//! photos, activity reports and checkpoint verifications) are written to a
//! local SQLite store and queued for upload. The queue drains whenever the
//! backend is reachable; nothing is lost while it is not.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod sync;

pub use config::Config;
pub use db::LocalStore;
pub use engine::{BackgroundHandle, Engine};
pub use error::StoreError;
pub use sync::{EntityType, SyncError};
