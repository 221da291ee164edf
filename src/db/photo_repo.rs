use sqlx::FromRow;

use super::repository::{
    format_timestamp, parse_timestamp, EntityCodec, Repository, SqlValue, SyncTracked,
};
use crate::error::StoreError;
use crate::models::Photo;
use crate::sync::EntityType;

#[derive(Debug, FromRow)]
pub struct PhotoRow {
    id: i64,
    user_id: String,
    timestamp: String,
    lat: f64,
    lon: f64,
    file_path: String,
    synced: bool,
    remote_id: Option<String>,
    sync_progress: i64,
}

pub struct PhotoCodec;

impl EntityCodec for PhotoCodec {
    type Model = Photo;
    type Row = PhotoRow;

    const TABLE: &'static str = "photos";
    const COLUMNS: &'static [&'static str] = &["user_id", "timestamp", "lat", "lon", "file_path"];
    const SYNC_COLUMNS: &'static [&'static str] = &["synced", "remote_id", "sync_progress"];

    fn id(model: &Photo) -> Option<i64> {
        model.id
    }

    fn set_id(model: &mut Photo, id: i64) {
        model.id = Some(id);
    }

    fn encode(model: &Photo) -> Vec<SqlValue> {
        vec![
            model.user_id.clone().into(),
            format_timestamp(&model.timestamp).into(),
            model.lat.into(),
            model.lon.into(),
            model.file_path.clone().into(),
        ]
    }

    fn decode(row: PhotoRow) -> Result<Photo, StoreError> {
        Ok(Photo {
            id: Some(row.id),
            user_id: row.user_id,
            timestamp: parse_timestamp(Self::TABLE, &row.timestamp)?,
            lat: row.lat,
            lon: row.lon,
            file_path: row.file_path,
            synced: row.synced,
            remote_id: row.remote_id,
            sync_progress: row.sync_progress,
        })
    }
}

impl SyncTracked for PhotoCodec {
    const ENTITY_TYPE: EntityType = EntityType::Photo;
    const SYNCED_EXTRA: &'static str = ", sync_progress = 100";
}

pub type PhotoRepository = Repository<PhotoCodec>;

impl Repository<PhotoCodec> {
    /// Records upload progress, clamped to 0..=100. Returns rows changed.
    pub async fn update_sync_progress(&self, id: i64, progress: i64) -> Result<u64, StoreError> {
        let progress = progress.clamp(0, 100);
        self.store()
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query("UPDATE photos SET sync_progress = ? WHERE id = ?")
                        .bind(progress)
                        .bind(id)
                        .execute(&mut *conn)
                        .await
                        .map_err(|e| Self::failed("update_sync_progress", e))?;
                    Ok::<_, StoreError>(result.rows_affected())
                })
            })
            .await
    }
}
