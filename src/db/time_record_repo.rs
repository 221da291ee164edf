use sqlx::FromRow;

use super::repository::{
    format_timestamp, parse_timestamp, EntityCodec, Predicate, Repository, SqlValue, SyncTracked,
};
use crate::error::StoreError;
use crate::models::{TimeRecord, TimeRecordType};
use crate::sync::EntityType;

#[derive(Debug, FromRow)]
pub struct TimeRecordRow {
    id: i64,
    user_id: String,
    #[sqlx(rename = "type")]
    record_type: String,
    timestamp: String,
    lat: f64,
    lon: f64,
    synced: bool,
    remote_id: Option<String>,
}

pub struct TimeRecordCodec;

impl EntityCodec for TimeRecordCodec {
    type Model = TimeRecord;
    type Row = TimeRecordRow;

    const TABLE: &'static str = "time_records";
    const COLUMNS: &'static [&'static str] = &["user_id", "type", "timestamp", "lat", "lon"];
    const SYNC_COLUMNS: &'static [&'static str] = &["synced", "remote_id"];

    fn id(model: &TimeRecord) -> Option<i64> {
        model.id
    }

    fn set_id(model: &mut TimeRecord, id: i64) {
        model.id = Some(id);
    }

    fn encode(model: &TimeRecord) -> Vec<SqlValue> {
        vec![
            model.user_id.clone().into(),
            model.record_type.to_string().into(),
            format_timestamp(&model.timestamp).into(),
            model.lat.into(),
            model.lon.into(),
        ]
    }

    fn decode(row: TimeRecordRow) -> Result<TimeRecord, StoreError> {
        let record_type: TimeRecordType = row
            .record_type
            .parse()
            .map_err(|e: String| StoreError::decode(Self::TABLE, e))?;

        Ok(TimeRecord {
            id: Some(row.id),
            user_id: row.user_id,
            record_type,
            timestamp: parse_timestamp(Self::TABLE, &row.timestamp)?,
            lat: row.lat,
            lon: row.lon,
            synced: row.synced,
            remote_id: row.remote_id,
        })
    }
}

impl SyncTracked for TimeRecordCodec {
    const ENTITY_TYPE: EntityType = EntityType::TimeRecord;
}

pub type TimeRecordRepository = Repository<TimeRecordCodec>;

impl Repository<TimeRecordCodec> {
    /// Most recent clock event of `user_id`, used to derive on/off duty.
    pub async fn latest_for_user(&self, user_id: &str) -> Result<Option<TimeRecord>, StoreError> {
        let mut found = self
            .get_by_predicate(
                &Predicate::new()
                    .eq("user_id", user_id)
                    .order_by_desc("timestamp")
                    .limit(1),
            )
            .await?;
        Ok(found.pop())
    }
}
