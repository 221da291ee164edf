use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::repository::{
    format_timestamp, parse_timestamp, EntityCodec, Predicate, ReferenceData, Repository, SqlValue,
};
use crate::error::StoreError;
use crate::models::Checkpoint;

#[derive(Debug, FromRow)]
pub struct CheckpointRow {
    id: i64,
    location_id: i64,
    name: String,
    lat: f64,
    lon: f64,
    last_updated: String,
    remote_id: Option<String>,
}

pub struct CheckpointCodec;

impl EntityCodec for CheckpointCodec {
    type Model = Checkpoint;
    type Row = CheckpointRow;

    const TABLE: &'static str = "checkpoints";
    const COLUMNS: &'static [&'static str] =
        &["location_id", "name", "lat", "lon", "last_updated", "remote_id"];

    fn id(model: &Checkpoint) -> Option<i64> {
        model.id
    }

    fn set_id(model: &mut Checkpoint, id: i64) {
        model.id = Some(id);
    }

    fn encode(model: &Checkpoint) -> Vec<SqlValue> {
        vec![
            model.location_id.into(),
            model.name.clone().into(),
            model.lat.into(),
            model.lon.into(),
            format_timestamp(&model.last_updated).into(),
            model.remote_id.clone().into(),
        ]
    }

    fn decode(row: CheckpointRow) -> Result<Checkpoint, StoreError> {
        Ok(Checkpoint {
            id: Some(row.id),
            location_id: row.location_id,
            name: row.name,
            lat: row.lat,
            lon: row.lon,
            last_updated: parse_timestamp(Self::TABLE, &row.last_updated)?,
            remote_id: row.remote_id,
        })
    }
}

impl ReferenceData for CheckpointCodec {
    fn remote_id(model: &Checkpoint) -> Option<&str> {
        model.remote_id.as_deref()
    }

    fn last_updated(model: &Checkpoint) -> DateTime<Utc> {
        model.last_updated
    }
}

pub type CheckpointRepository = Repository<CheckpointCodec>;

impl Repository<CheckpointCodec> {
    pub async fn for_location(&self, location_id: i64) -> Result<Vec<Checkpoint>, StoreError> {
        self.get_by_predicate(
            &Predicate::new()
                .eq("location_id", location_id)
                .order_by("name"),
        )
        .await
    }
}
