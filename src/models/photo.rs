use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A photo taken in the field. The image itself stays on disk at `file_path`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Photo {
    pub id: Option<i64>,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub file_path: String,
    pub synced: bool,
    pub remote_id: Option<String>,
    /// Upload progress, 0 to 100.
    pub sync_progress: i64,
}

impl Photo {
    pub fn new(user_id: impl Into<String>, file_path: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            timestamp: Utc::now(),
            lat,
            lon,
            file_path: file_path.into(),
            synced: false,
            remote_id: None,
            sync_progress: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}
