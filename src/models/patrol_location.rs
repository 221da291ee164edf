use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A site patrolled by guards. Downloaded from the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatrolLocation {
    pub id: Option<i64>,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub last_updated: DateTime<Utc>,
    pub remote_id: Option<String>,
}

impl PatrolLocation {
    pub fn new(name: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            id: None,
            name: name.into(),
            lat,
            lon,
            last_updated: Utc::now(),
            remote_id: None,
        }
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    pub fn with_last_updated(mut self, last_updated: DateTime<Utc>) -> Self {
        self.last_updated = last_updated;
        self
    }
}
