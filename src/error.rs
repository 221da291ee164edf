//! Store error types.

use thiserror::Error;

use crate::db::SchemaVersion;

/// Errors raised by the local store, the migration manager and repositories.
///
/// "Not found" is never an error: reads return `None` or an empty list and
/// writes report zero affected rows.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file is locked, corrupt or the store was closed.
    /// Fatal for the session; the store has to be reset.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A migration step failed. Startup must abort.
    #[error("Migration to schema {version} failed: {source}")]
    Migration {
        version: SchemaVersion,
        #[source]
        source: sqlx::Error,
    },

    /// `run_in_transaction` was called from inside a transaction action.
    #[error("Transactions cannot be nested")]
    NestedTransaction,

    /// A predicate referenced a column the entity does not have.
    #[error("Unknown column '{column}' for table '{table}'")]
    UnknownColumn { table: &'static str, column: String },

    /// A persisted row could not be converted into its model.
    #[error("Corrupt row in '{table}': {reason}")]
    Decode { table: &'static str, reason: String },

    /// Any other database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn decode(table: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Decode {
            table,
            reason: reason.into(),
        }
    }

    /// True for errors that mean the store cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Migration { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
