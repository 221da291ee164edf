use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of clock event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeRecordType {
    ClockIn,
    ClockOut,
    BreakStart,
    BreakEnd,
}

impl fmt::Display for TimeRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeRecordType::ClockIn => write!(f, "ClockIn"),
            TimeRecordType::ClockOut => write!(f, "ClockOut"),
            TimeRecordType::BreakStart => write!(f, "BreakStart"),
            TimeRecordType::BreakEnd => write!(f, "BreakEnd"),
        }
    }
}

impl FromStr for TimeRecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "clockin" => Ok(TimeRecordType::ClockIn),
            "clockout" => Ok(TimeRecordType::ClockOut),
            "breakstart" => Ok(TimeRecordType::BreakStart),
            "breakend" => Ok(TimeRecordType::BreakEnd),
            _ => Err(format!(
                "Invalid time record type '{}'. Valid options: ClockIn, ClockOut, BreakStart, BreakEnd",
                s
            )),
        }
    }
}

/// A clock-in/clock-out style event recorded on the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeRecord {
    pub id: Option<i64>,
    pub user_id: String,
    #[serde(rename = "type")]
    pub record_type: TimeRecordType,
    pub timestamp: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    pub synced: bool,
    pub remote_id: Option<String>,
}

impl TimeRecord {
    pub fn new(user_id: impl Into<String>, record_type: TimeRecordType, lat: f64, lon: f64) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            record_type,
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

impl fmt::Display for TimeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} at {} ({:.5}, {:.5})",
            self.user_id,
            self.record_type,
            self.timestamp.to_rfc3339(),
            self.lat,
            self.lon
        )
    }
}
