use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::repository::{
    format_timestamp, parse_timestamp, EntityCodec, Predicate, Repository, SqlValue, SyncTracked,
};
use crate::error::StoreError;
use crate::models::LocationRecord;
use crate::sync::EntityType;

#[derive(Debug, FromRow)]
pub struct LocationRecordRow {
    id: i64,
    user_id: String,
    timestamp: String,
    lat: f64,
    lon: f64,
    accuracy: f64,
    synced: bool,
    remote_id: Option<String>,
}

pub struct LocationRecordCodec;

impl EntityCodec for LocationRecordCodec {
    type Model = LocationRecord;
    type Row = LocationRecordRow;

    const TABLE: &'static str = "location_records";
    const COLUMNS: &'static [&'static str] = &["user_id", "timestamp", "lat", "lon", "accuracy"];
    const SYNC_COLUMNS: &'static [&'static str] = &["synced", "remote_id"];

    fn id(model: &LocationRecord) -> Option<i64> {
        model.id
    }

    fn set_id(model: &mut LocationRecord, id: i64) {
        model.id = Some(id);
    }

    fn encode(model: &LocationRecord) -> Vec<SqlValue> {
        vec![
            model.user_id.clone().into(),
            format_timestamp(&model.timestamp).into(),
            model.lat.into(),
            model.lon.into(),
            model.accuracy.into(),
        ]
    }

    fn decode(row: LocationRecordRow) -> Result<LocationRecord, StoreError> {
        Ok(LocationRecord {
            id: Some(row.id),
            user_id: row.user_id,
            timestamp: parse_timestamp(Self::TABLE, &row.timestamp)?,
            lat: row.lat,
            lon: row.lon,
            accuracy: row.accuracy,
            synced: row.synced,
            remote_id: row.remote_id,
        })
    }
}

impl SyncTracked for LocationRecordCodec {
    const ENTITY_TYPE: EntityType = EntityType::LocationRecord;
}

pub type LocationRecordRepository = Repository<LocationRecordCodec>;

impl Repository<LocationRecordCodec> {
    /// Track of `user_id` in `[from, to)`, oldest first.
    pub async fn between(
        &self,
        user_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        self.get_by_predicate(
            &Predicate::new()
                .eq("user_id", user_id)
                .gte("timestamp", from)
                .lt("timestamp", to)
                .order_by("timestamp"),
        )
        .await
    }
}
