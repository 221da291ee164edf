use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kinds of entity that are pushed to the backend through the sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    TimeRecord,
    LocationRecord,
    Photo,
    ActivityReport,
    CheckpointVerification,
}

impl EntityType {
    pub const ALL: [EntityType; 5] = [
        EntityType::TimeRecord,
        EntityType::LocationRecord,
        EntityType::Photo,
        EntityType::ActivityReport,
        EntityType::CheckpointVerification,
    ];

    /// Name stored in `sync_queue.entity_type`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::TimeRecord => "TimeRecord",
            EntityType::LocationRecord => "LocationRecord",
            EntityType::Photo => "Photo",
            EntityType::ActivityReport => "ActivityReport",
            EntityType::CheckpointVerification => "CheckpointVerification",
        }
    }

    /// Priority given to new queue entries. Higher drains first.
    pub fn default_priority(&self) -> i64 {
        match self {
            EntityType::TimeRecord | EntityType::CheckpointVerification => 10,
            EntityType::ActivityReport => 5,
            EntityType::Photo => 3,
            EntityType::LocationRecord => 1,
        }
    }

    /// Path segment of the backend collection.
    pub fn api_path(&self) -> &'static str {
        match self {
            EntityType::TimeRecord => "time-records",
            EntityType::LocationRecord => "location-records",
            EntityType::Photo => "photos",
            EntityType::ActivityReport => "activity-reports",
            EntityType::CheckpointVerification => "checkpoint-verifications",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['_', '-'], "").as_str() {
            "timerecord" => Ok(EntityType::TimeRecord),
            "locationrecord" => Ok(EntityType::LocationRecord),
            "photo" => Ok(EntityType::Photo),
            "activityreport" => Ok(EntityType::ActivityReport),
            "checkpointverification" => Ok(EntityType::CheckpointVerification),
            _ => Err(format!(
                "Invalid entity type '{}'. Valid options: TimeRecord, LocationRecord, Photo, ActivityReport, CheckpointVerification",
                s
            )),
        }
    }
}
