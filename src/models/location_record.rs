use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A GPS fix captured while on duty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationRecord {
    pub id: Option<i64>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Horizontal accuracy in meters.
    pub accuracy: f64,
    pub synced: bool,
    pub remote_id: Option<String>,
}

impl LocationRecord {
    pub fn new(user_id: impl Into<String>, lat: f64, lon: f64, accuracy: f64) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            lat,
            lon,
            accuracy,
            synced: false,
            remote_id: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
