use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proof that a guard visited a checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointVerification {
    pub id: Option<i64>,
    pub user_id: String,
    pub checkpoint_id: i64,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub synced: bool,
    pub remote_id: Option<String>,
}

impl CheckpointVerification {
    pub fn new(user_id: impl Into<String>, checkpoint_id: i64, lat: f64, lon: f64) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            checkpoint_id,
            timestamp: Utc::now(),
            lat,
            lon,
            synced: false,
            remote_id: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
