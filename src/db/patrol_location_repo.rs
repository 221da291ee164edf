use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::repository::{
    format_timestamp, parse_timestamp, EntityCodec, ReferenceData, Repository, SqlValue,
};
use crate::error::StoreError;
use crate::models::PatrolLocation;

#[derive(Debug, FromRow)]
pub struct PatrolLocationRow {
    id: i64,
    name: String,
    lat: f64,
    lon: f64,
    last_updated: String,
    remote_id: Option<String>,
}

pub struct PatrolLocationCodec;

impl EntityCodec for PatrolLocationCodec {
    type Model = PatrolLocation;
    type Row = PatrolLocationRow;

    const TABLE: &'static str = "patrol_locations";
    const COLUMNS: &'static [&'static str] = &["name", "lat", "lon", "last_updated", "remote_id"];

    fn id(model: &PatrolLocation) -> Option<i64> {
        model.id
    }

    fn set_id(model: &mut PatrolLocation, id: i64) {
        model.id = Some(id);
    }

    fn encode(model: &PatrolLocation) -> Vec<SqlValue> {
        vec![
            model.name.clone().into(),
            model.lat.into(),
            model.lon.into(),
            format_timestamp(&model.last_updated).into(),
            model.remote_id.clone().into(),
        ]
    }

    fn decode(row: PatrolLocationRow) -> Result<PatrolLocation, StoreError> {
        Ok(PatrolLocation {
            id: Some(row.id),
            name: row.name,
            lat: row.lat,
            lon: row.lon,
            last_updated: parse_timestamp(Self::TABLE, &row.last_updated)?,
            remote_id: row.remote_id,
        })
    }
}

impl ReferenceData for PatrolLocationCodec {
    fn remote_id(model: &PatrolLocation) -> Option<&str> {
        model.remote_id.as_deref()
    }

    fn last_updated(model: &PatrolLocation) -> DateTime<Utc> {
        model.last_updated
    }
}

pub type PatrolLocationRepository = Repository<PatrolLocationCodec>;
