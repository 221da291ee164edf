use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-text report written by a guard during a shift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityReport {
    pub id: Option<i64>,
    pub user_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub synced: bool,
    pub remote_id: Option<String>,
}

impl ActivityReport {
    pub fn new(user_id: impl Into<String>, text: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            text: text.into(),
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

impl fmt::Display for ActivityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Report by {} at {}", self.user_id, self.timestamp.to_rfc3339())?;
        writeln!(f, "{}", "=".repeat(30))?;
        write!(f, "{}", self.text)
    }
}
