use sqlx::FromRow;

use super::repository::{
    format_timestamp, parse_timestamp, EntityCodec, Predicate, Repository, SqlValue, SyncTracked,
};
use crate::error::StoreError;
use crate::models::CheckpointVerification;
use crate::sync::EntityType;

#[derive(Debug, FromRow)]
pub struct CheckpointVerificationRow {
    id: i64,
    user_id: String,
    checkpoint_id: i64,
    timestamp: String,
    lat: f64,
    lon: f64,
    synced: bool,
    remote_id: Option<String>,
}

pub struct CheckpointVerificationCodec;

impl EntityCodec for CheckpointVerificationCodec {
    type Model = CheckpointVerification;
    type Row = CheckpointVerificationRow;

    const TABLE: &'static str = "checkpoint_verifications";
    const COLUMNS: &'static [&'static str] = &["user_id", "checkpoint_id", "timestamp", "lat", "lon"];
    const SYNC_COLUMNS: &'static [&'static str] = &["synced", "remote_id"];

    fn id(model: &CheckpointVerification) -> Option<i64> {
        model.id
    }

    fn set_id(model: &mut CheckpointVerification, id: i64) {
        model.id = Some(id);
    }

    fn encode(model: &CheckpointVerification) -> Vec<SqlValue> {
        vec![
            model.user_id.clone().into(),
            model.checkpoint_id.into(),
            format_timestamp(&model.timestamp).into(),
            model.lat.into(),
            model.lon.into(),
        ]
    }

    fn decode(row: CheckpointVerificationRow) -> Result<CheckpointVerification, StoreError> {
        Ok(CheckpointVerification {
            id: Some(row.id),
            user_id: row.user_id,
            checkpoint_id: row.checkpoint_id,
            timestamp: parse_timestamp(Self::TABLE, &row.timestamp)?,
            lat: row.lat,
            lon: row.lon,
            synced: row.synced,
            remote_id: row.remote_id,
        })
    }
}

impl SyncTracked for CheckpointVerificationCodec {
    const ENTITY_TYPE: EntityType = EntityType::CheckpointVerification;
}

pub type CheckpointVerificationRepository = Repository<CheckpointVerificationCodec>;

impl Repository<CheckpointVerificationCodec> {
    /// Verifications of one checkpoint, newest first.
    pub async fn for_checkpoint(
        &self,
        checkpoint_id: i64,
    ) -> Result<Vec<CheckpointVerification>, StoreError> {
        self.get_by_predicate(
            &Predicate::new()
                .eq("checkpoint_id", checkpoint_id)
                .order_by_desc("timestamp"),
        )
        .await
    }
}
