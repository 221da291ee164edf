use sqlx::FromRow;

use super::repository::{
    format_timestamp, parse_timestamp, EntityCodec, Repository, SqlValue, SyncTracked,
};
use crate::error::StoreError;
use crate::models::ActivityReport;
use crate::sync::EntityType;

#[derive(Debug, FromRow)]
pub struct ActivityReportRow {
    id: i64,
    user_id: String,
    text: String,
    timestamp: String,
    lat: f64,
    lon: f64,
    synced: bool,
    remote_id: Option<String>,
}

pub struct ActivityReportCodec;

impl EntityCodec for ActivityReportCodec {
    type Model = ActivityReport;
    type Row = ActivityReportRow;

    const TABLE: &'static str = "activity_reports";
    const COLUMNS: &'static [&'static str] = &["user_id", "text", "timestamp", "lat", "lon"];
    const SYNC_COLUMNS: &'static [&'static str] = &["synced", "remote_id"];

    fn id(model: &ActivityReport) -> Option<i64> {
        model.id
    }

    fn set_id(model: &mut ActivityReport, id: i64) {
        model.id = Some(id);
    }

    fn encode(model: &ActivityReport) -> Vec<SqlValue> {
        vec![
            model.user_id.clone().into(),
            model.text.clone().into(),
            format_timestamp(&model.timestamp).into(),
            model.lat.into(),
            model.lon.into(),
        ]
    }

    fn decode(row: ActivityReportRow) -> Result<ActivityReport, StoreError> {
        Ok(ActivityReport {
            id: Some(row.id),
            user_id: row.user_id,
            text: row.text,
            timestamp: parse_timestamp(Self::TABLE, &row.timestamp)?,
            lat: row.lat,
            lon: row.lon,
            synced: row.synced,
            remote_id: row.remote_id,
        })
    }
}

impl SyncTracked for ActivityReportCodec {
    const ENTITY_TYPE: EntityType = EntityType::ActivityReport;
}

pub type ActivityReportRepository = Repository<ActivityReportCodec>;
