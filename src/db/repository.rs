//! Generic repository over a row/model codec.
//!
//! Entity-specific repositories are type aliases of [`Repository`] with a
//! codec that knows the table, its columns and how to convert between the
//! persisted row and the domain model. Every write goes through
//! [`LocalStore::run_in_transaction`]; the `*_in` functions take an open
//! connection so several writes can share one transaction.

use std::marker::PhantomData;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sqlx::query::{Query, QueryAs};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Executor, FromRow, Sqlite, SqliteConnection};

use super::LocalStore;
use crate::error::StoreError;
use crate::sync::{queue, EntityType};

/// A value bound into a generated statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Integer(value as i64)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(value: DateTime<Utc>) -> Self {
        SqlValue::Text(format_timestamp(&value))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Timestamps are stored as UTC RFC 3339 text with millisecond precision,
/// which keeps lexical and chronological order identical.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(table: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::decode(table, format!("bad timestamp '{}': {}", value, e)))
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;
type SqliteQueryAs<'q, O> = QueryAs<'q, Sqlite, O, SqliteArguments<'q>>;

fn bind_value(query: SqliteQuery<'_>, value: SqlValue) -> SqliteQuery<'_> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(v) => query.bind(v),
        SqlValue::Real(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
    }
}

fn bind_value_as<O>(query: SqliteQueryAs<'_, O>, value: SqlValue) -> SqliteQueryAs<'_, O> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(v) => query.bind(v),
        SqlValue::Real(v) => query.bind(v),
        SqlValue::Text(v) => query.bind(v),
    }
}

/// Converts between a table row and a domain model.
pub trait EntityCodec: Send + Sync + 'static {
    type Model: Clone + Serialize + Send + Sync + Unpin + 'static;
    type Row: for<'r> FromRow<'r, SqliteRow> + Send + Unpin;

    const TABLE: &'static str;
    /// Columns written by insert and update, in [`EntityCodec::encode`] order.
    const COLUMNS: &'static [&'static str];
    /// Columns only the sync engine writes. Readable and usable in
    /// predicates, never touched by insert or update.
    const SYNC_COLUMNS: &'static [&'static str] = &[];

    fn id(model: &Self::Model) -> Option<i64>;
    fn set_id(model: &mut Self::Model, id: i64);
    fn encode(model: &Self::Model) -> Vec<SqlValue>;
    fn decode(row: Self::Row) -> Result<Self::Model, StoreError>;
}

/// Codecs of entities that are pushed to the backend.
pub trait SyncTracked: EntityCodec {
    const ENTITY_TYPE: EntityType;
    /// Extra assignments appended to the mark-synced statement.
    const SYNCED_EXTRA: &'static str = "";

    fn payload(model: &Self::Model) -> Result<serde_json::Value, StoreError> {
        serde_json::to_value(model)
            .map_err(|e| StoreError::decode(Self::TABLE, format!("cannot serialize payload: {}", e)))
    }
}

/// Codecs of reference data downloaded from the backend.
pub trait ReferenceData: EntityCodec {
    fn remote_id(model: &Self::Model) -> Option<&str>;
    fn last_updated(model: &Self::Model) -> DateTime<Utc>;
}

/// What [`Repository::apply_remote`] did with an incoming row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    Inserted(i64),
    Updated(i64),
    /// The local row is newer; nothing was written.
    Stale(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    IsNull,
    IsNotNull,
}

impl Comparison {
    fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::IsNull => "IS NULL",
            Comparison::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone)]
struct Clause {
    column: String,
    comparison: Comparison,
    value: SqlValue,
}

/// Conjunction of column comparisons, with optional ordering and limit.
///
/// ```
/// use fieldsync::db::Predicate;
///
/// let unsynced_for_user = Predicate::new()
///     .eq("user_id", "u1")
///     .eq("synced", false)
///     .order_by_desc("timestamp")
///     .limit(10);
/// # let _ = unsynced_for_user;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    clauses: Vec<Clause>,
    order_by: Option<(String, bool)>,
    limit: Option<i64>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, column: &str, comparison: Comparison, value: SqlValue) -> Self {
        self.clauses.push(Clause {
            column: column.to_string(),
            comparison,
            value,
        });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.push(column, Comparison::Eq, value.into())
    }

    pub fn ne(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.push(column, Comparison::Ne, value.into())
    }

    pub fn lt(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.push(column, Comparison::Lt, value.into())
    }

    pub fn lte(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.push(column, Comparison::Lte, value.into())
    }

    pub fn gt(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.push(column, Comparison::Gt, value.into())
    }

    pub fn gte(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.push(column, Comparison::Gte, value.into())
    }

    pub fn is_null(self, column: &str) -> Self {
        self.push(column, Comparison::IsNull, SqlValue::Null)
    }

    pub fn is_not_null(self, column: &str) -> Self {
        self.push(column, Comparison::IsNotNull, SqlValue::Null)
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by = Some((column.to_string(), false));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by = Some((column.to_string(), true));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Renders `WHERE … ORDER BY … LIMIT …` for `C`, rejecting columns the
    /// entity does not have.
    fn render<C: EntityCodec>(&self) -> Result<(String, Vec<SqlValue>), StoreError> {
        let known = |column: &str| {
            column == "id" || C::COLUMNS.contains(&column) || C::SYNC_COLUMNS.contains(&column)
        };
        let unknown = |column: &str| StoreError::UnknownColumn {
            table: C::TABLE,
            column: column.to_string(),
        };

        let mut sql = String::new();
        let mut values = Vec::new();

        for (i, clause) in self.clauses.iter().enumerate() {
            if !known(&clause.column) {
                return Err(unknown(&clause.column));
            }
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            match clause.comparison {
                Comparison::IsNull | Comparison::IsNotNull => {
                    sql.push_str(&format!(
                        "\"{}\" {}",
                        clause.column,
                        clause.comparison.operator()
                    ));
                }
                _ => {
                    sql.push_str(&format!(
                        "\"{}\" {} ?",
                        clause.column,
                        clause.comparison.operator()
                    ));
                    values.push(clause.value.clone());
                }
            }
        }

        match &self.order_by {
            Some((column, desc)) => {
                if !known(column) {
                    return Err(unknown(column));
                }
                sql.push_str(&format!(
                    " ORDER BY \"{}\" {}, id",
                    column,
                    if *desc { "DESC" } else { "ASC" }
                ));
            }
            None => sql.push_str(" ORDER BY id"),
        }

        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            values.push(SqlValue::Integer(limit));
        }

        Ok((sql, values))
    }
}

/// CRUD for one entity type.
pub struct Repository<C: EntityCodec> {
    store: LocalStore,
    _codec: PhantomData<fn() -> C>,
}

impl<C: EntityCodec> Clone for Repository<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _codec: PhantomData,
        }
    }
}

impl<C: EntityCodec> std::fmt::Debug for Repository<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("table", &C::TABLE)
            .finish()
    }
}

impl<C: EntityCodec> Repository<C> {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            _codec: PhantomData,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Logs a failed store operation with the entity it concerned.
    pub(crate) fn failed(operation: &'static str, error: impl Into<StoreError>) -> StoreError {
        let error = error.into();
        tracing::error!(entity = C::TABLE, operation, error = %error, "Store operation failed");
        error
    }

    async fn select<'e, X>(executor: X, predicate: &Predicate) -> Result<Vec<C::Model>, StoreError>
    where
        X: Executor<'e, Database = Sqlite>,
    {
        let (clause, values) = predicate.render::<C>()?;
        let sql = format!("SELECT * FROM {}{}", C::TABLE, clause);

        let mut query = sqlx::query_as::<_, C::Row>(&sql);
        for value in values {
            query = bind_value_as(query, value);
        }
        let rows = query.fetch_all(executor).await?;

        rows.into_iter().map(C::decode).collect()
    }

    pub async fn get_all(&self) -> Result<Vec<C::Model>, StoreError> {
        self.get_by_predicate(&Predicate::new()).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<C::Model>, StoreError> {
        let mut found = self
            .get_by_predicate(&Predicate::new().eq("id", id).limit(1))
            .await?;
        Ok(found.pop())
    }

    pub async fn get_by_predicate(&self, predicate: &Predicate) -> Result<Vec<C::Model>, StoreError> {
        let pool = self
            .store
            .acquire()
            .await
            .map_err(|e| Self::failed("select", e))?;
        Self::select(&pool, predicate)
            .await
            .map_err(|e| Self::failed("select", e))
    }

    pub async fn get_by_id_in(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<C::Model>, StoreError> {
        let mut found = Self::select(&mut *conn, &Predicate::new().eq("id", id).limit(1))
            .await
            .map_err(|e| Self::failed("select", e))?;
        Ok(found.pop())
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let pool = self
            .store
            .acquire()
            .await
            .map_err(|e| Self::failed("count", e))?;
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", C::TABLE))
            .fetch_one(&pool)
            .await
            .map_err(|e| Self::failed("count", e))
    }

    /// Inserts `model` and returns the identifier assigned to it. Any id
    /// already present on the model is ignored.
    pub async fn insert(&self, model: &C::Model) -> Result<i64, StoreError> {
        let model = model.clone();
        self.store
            .run_in_transaction(move |conn| Box::pin(async move { Self::insert_in(conn, &model).await }))
            .await
    }

    /// Updates the row with the model's id. Returns the number of rows
    /// changed: 0 when the model has no id or the row does not exist.
    pub async fn update(&self, model: &C::Model) -> Result<u64, StoreError> {
        let model = model.clone();
        self.store
            .run_in_transaction(move |conn| Box::pin(async move { Self::update_in(conn, &model).await }))
            .await
    }

    /// Updates the row when it exists, inserts it otherwise. Returns the id.
    pub async fn upsert(&self, model: &C::Model) -> Result<i64, StoreError> {
        let model = model.clone();
        self.store
            .run_in_transaction(move |conn| Box::pin(async move { Self::upsert_in(conn, &model).await }))
            .await
    }

    /// Hard delete. Deleting an absent id returns 0.
    pub async fn delete(&self, id: i64) -> Result<u64, StoreError> {
        self.store
            .run_in_transaction(move |conn| Box::pin(async move { Self::delete_in(conn, id).await }))
            .await
    }

    pub async fn insert_in(conn: &mut SqliteConnection, model: &C::Model) -> Result<i64, StoreError> {
        Self::insert_row(conn, None, model)
            .await
            .map_err(|e| Self::failed("insert", e))
    }

    async fn insert_row(
        conn: &mut SqliteConnection,
        id: Option<i64>,
        model: &C::Model,
    ) -> Result<i64, sqlx::Error> {
        let mut columns: Vec<&str> = Vec::with_capacity(C::COLUMNS.len() + 1);
        let mut values = Vec::with_capacity(C::COLUMNS.len() + 1);
        if let Some(id) = id {
            columns.push("id");
            values.push(SqlValue::Integer(id));
        }
        columns.extend_from_slice(C::COLUMNS);
        values.extend(C::encode(model));

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            C::TABLE,
            columns.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for value in values {
            query = bind_value(query, value);
        }
        let result = query.execute(&mut *conn).await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn update_in(conn: &mut SqliteConnection, model: &C::Model) -> Result<u64, StoreError> {
        let Some(id) = C::id(model) else {
            return Ok(0);
        };

        // remote_id is assigned once and never cleared.
        let assignments: Vec<String> = C::COLUMNS
            .iter()
            .map(|column| {
                if *column == "remote_id" {
                    "remote_id = COALESCE(remote_id, ?)".to_string()
                } else {
                    format!("{} = ?", column)
                }
            })
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?",
            C::TABLE,
            assignments.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for value in C::encode(model) {
            query = bind_value(query, value);
        }
        let result = query
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Self::failed("update", e))?;

        if result.rows_affected() == 0 {
            tracing::debug!(entity = C::TABLE, id, "Nothing to update");
        }
        Ok(result.rows_affected())
    }

    pub async fn upsert_in(conn: &mut SqliteConnection, model: &C::Model) -> Result<i64, StoreError> {
        if let Some(id) = C::id(model) {
            if Self::update_in(conn, model).await? > 0 {
                return Ok(id);
            }
        }
        Self::insert_row(conn, C::id(model), model)
            .await
            .map_err(|e| Self::failed("upsert", e))
    }

    pub async fn delete_in(conn: &mut SqliteConnection, id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", C::TABLE))
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Self::failed("delete", e))?;
        Ok(result.rows_affected())
    }
}

impl<C: SyncTracked> Repository<C> {
    /// Inserts `model` and queues it for push, in one transaction.
    pub async fn insert_tracked(&self, model: &C::Model) -> Result<i64, StoreError> {
        let model = model.clone();
        self.store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let id = Self::insert_in(conn, &model).await?;
                    queue::enqueue_in(
                        conn,
                        C::ENTITY_TYPE,
                        &id.to_string(),
                        C::ENTITY_TYPE.default_priority(),
                        Utc::now(),
                    )
                    .await?;
                    Ok(id)
                })
            })
            .await
    }

    /// Updates `model` and queues it for push, in one transaction. Nothing
    /// is queued when the row does not exist.
    pub async fn update_tracked(&self, model: &C::Model) -> Result<u64, StoreError> {
        let model = model.clone();
        self.store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let affected = Self::update_in(conn, &model).await?;
                    if let (true, Some(id)) = (affected > 0, C::id(&model)) {
                        queue::enqueue_in(
                            conn,
                            C::ENTITY_TYPE,
                            &id.to_string(),
                            C::ENTITY_TYPE.default_priority(),
                            Utc::now(),
                        )
                        .await?;
                    }
                    Ok(affected)
                })
            })
            .await
    }

    /// Rows not yet created on the backend.
    pub async fn unsynced(&self) -> Result<Vec<C::Model>, StoreError> {
        self.get_by_predicate(&Predicate::new().eq("synced", false))
            .await
    }

    /// Push payload for the row with `id`, `None` when the row is gone.
    pub async fn payload_in(
        conn: &mut SqliteConnection,
        id: i64,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        match Self::get_by_id_in(conn, id).await? {
            Some(model) => C::payload(&model).map(Some),
            None => Ok(None),
        }
    }

    /// Records a successful push: sets `remote_id` (only if not already
    /// set) and `synced` in one statement.
    pub async fn mark_synced_in(
        conn: &mut SqliteConnection,
        id: i64,
        remote_id: &str,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE {} SET remote_id = COALESCE(remote_id, ?), synced = 1{} WHERE id = ?",
            C::TABLE,
            C::SYNCED_EXTRA
        );
        let result = sqlx::query(&sql)
            .bind(remote_id)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Self::failed("mark_synced", e))?;
        Ok(result.rows_affected())
    }

    /// Keeps the backend id of a push whose payload was edited while in
    /// flight. The row stays unsynced so the newer version is pushed next.
    pub async fn record_remote_id_in(
        conn: &mut SqliteConnection,
        id: i64,
        remote_id: &str,
    ) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE {} SET remote_id = COALESCE(remote_id, ?) WHERE id = ?",
            C::TABLE
        );
        let result = sqlx::query(&sql)
            .bind(remote_id)
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(|e| Self::failed("record_remote_id", e))?;
        Ok(result.rows_affected())
    }
}

impl<C: ReferenceData> Repository<C> {
    /// Applies a row downloaded from the backend, matched on `remote_id`.
    /// Last write wins: the local row is replaced only when the incoming
    /// `last_updated` is not older.
    pub async fn apply_remote(&self, incoming: &C::Model) -> Result<RemoteApply, StoreError> {
        let Some(remote_id) = C::remote_id(incoming).map(str::to_string) else {
            return Err(Self::failed(
                "apply_remote",
                StoreError::decode(C::TABLE, "downloaded row has no remote_id"),
            ));
        };
        let incoming = incoming.clone();

        self.store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    let existing = Self::select(
                        &mut *conn,
                        &Predicate::new().eq("remote_id", remote_id.as_str()).limit(1),
                    )
                    .await
                    .map_err(|e| Self::failed("apply_remote", e))?
                    .pop();

                    match existing {
                        None => {
                            let id = Self::insert_in(conn, &incoming).await?;
                            Ok(RemoteApply::Inserted(id))
                        }
                        Some(local) => {
                            let Some(id) = C::id(&local) else {
                                return Err(StoreError::decode(C::TABLE, "stored row without id"));
                            };
                            if C::last_updated(&incoming) < C::last_updated(&local) {
                                tracing::debug!(entity = C::TABLE, id, %remote_id, "Ignoring stale download");
                                return Ok(RemoteApply::Stale(id));
                            }
                            let mut replacement = incoming;
                            C::set_id(&mut replacement, id);
                            Self::update_in(conn, &replacement).await?;
                            Ok(RemoteApply::Updated(id))
                        }
                    }
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_store;
    use crate::db::{PatrolLocationCodec, TimeRecordCodec};
    use crate::models::{PatrolLocation, TimeRecord, TimeRecordType};

    type TimeRecords = Repository<TimeRecordCodec>;

    fn clock_in(user: &str) -> TimeRecord {
        TimeRecord::new(user, TimeRecordType::ClockIn, 37.7749, -122.4194)
    }

    #[test]
    fn test_timestamp_format_sorts_lexically() {
        let early = DateTime::parse_from_rfc3339("2025-01-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let late = DateTime::parse_from_rfc3339("2025-01-01T10:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&early), "2025-01-01T09:00:00.000Z");
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(
            parse_timestamp("t", &format_timestamp(&late)).unwrap(),
            late
        );
        assert!(parse_timestamp("t", "yesterday").is_err());
    }

    #[test]
    fn test_predicate_rejects_unknown_column() {
        let err = Predicate::new()
            .eq("user_id; DROP TABLE users", "x")
            .render::<TimeRecordCodec>()
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownColumn { .. }));
    }

    #[test]
    fn test_predicate_renders_clauses_in_order() {
        let (sql, values) = Predicate::new()
            .eq("user_id", "u1")
            .is_null("remote_id")
            .order_by_desc("timestamp")
            .limit(5)
            .render::<TimeRecordCodec>()
            .unwrap();
        assert_eq!(
            sql,
            " WHERE \"user_id\" = ? AND \"remote_id\" IS NULL ORDER BY \"timestamp\" DESC, id LIMIT ?"
        );
        assert_eq!(
            values,
            vec![SqlValue::Text("u1".into()), SqlValue::Integer(5)]
        );
    }

    #[tokio::test]
    async fn test_read_after_write() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());

        let id = repo.insert(&clock_in("u1")).await.unwrap();
        assert!(id > 0);
        let mut fetched = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, Some(id));

        fetched.record_type = TimeRecordType::ClockOut;
        assert_eq!(repo.update(&fetched).await.unwrap(), 1);
        let fetched = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(fetched.record_type, TimeRecordType::ClockOut);

        assert_eq!(repo.delete(id).await.unwrap(), 1);
        assert!(repo.get_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_of_missing_rows_are_empty() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());

        assert!(repo.get_all().await.unwrap().is_empty());
        assert!(repo.get_by_id(42).await.unwrap().is_none());
        assert!(repo
            .get_by_predicate(&Predicate::new().eq("user_id", "nobody"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_return_zero() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());

        let mut ghost = clock_in("u1");
        assert_eq!(repo.update(&ghost).await.unwrap(), 0);
        ghost.id = Some(999);
        assert_eq!(repo.update(&ghost).await.unwrap(), 0);

        assert_eq!(repo.delete(999).await.unwrap(), 0);
        assert_eq!(repo.delete(999).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_updates() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());

        let mut record = clock_in("u1");
        record.id = Some(7);
        assert_eq!(repo.upsert(&record).await.unwrap(), 7);
        assert_eq!(repo.count().await.unwrap(), 1);

        record.lat = 1.5;
        assert_eq!(repo.upsert(&record).await.unwrap(), 7);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.get_by_id(7).await.unwrap().unwrap().lat, 1.5);
    }

    #[tokio::test]
    async fn test_get_by_predicate_filters_and_orders() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());
        let base = Utc::now();

        for (user, minutes) in [("u1", 0), ("u2", 5), ("u1", 10)] {
            let record = clock_in(user).with_timestamp(base + chrono::Duration::minutes(minutes));
            repo.insert(&record).await.unwrap();
        }

        let found = repo
            .get_by_predicate(&Predicate::new().eq("user_id", "u1").order_by_desc("timestamp"))
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found[0].timestamp > found[1].timestamp);
    }

    #[tokio::test]
    async fn test_rollback_discards_repository_writes() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());
        repo.insert(&clock_in("u1")).await.unwrap();
        let before = repo.count().await.unwrap();

        let record = clock_in("u2");
        let result: Result<(), StoreError> = ctx
            .store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    TimeRecords::insert_in(conn, &record).await?;
                    Err(StoreError::Unavailable("device storage full".into()))
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(repo.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_remote_id_is_never_cleared_by_update() {
        let ctx = test_store();
        let repo = Repository::<PatrolLocationCodec>::new(ctx.store.clone());

        let location = PatrolLocation::new("Depot", 1.0, 2.0).with_remote_id("srv-1");
        let id = repo.insert(&location).await.unwrap();

        let mut stored = repo.get_by_id(id).await.unwrap().unwrap();
        stored.remote_id = None;
        stored.name = "Main Depot".into();
        repo.update(&stored).await.unwrap();

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Main Depot");
        assert_eq!(stored.remote_id.as_deref(), Some("srv-1"));
    }

    #[tokio::test]
    async fn test_mark_synced_sets_both_fields_once() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());
        let id = repo.insert(&clock_in("u1")).await.unwrap();

        ctx.store
            .run_in_transaction(move |conn| {
                Box::pin(async move {
                    TimeRecords::mark_synced_in(conn, id, "r-1").await?;
                    TimeRecords::mark_synced_in(conn, id, "r-2").await
                })
            })
            .await
            .unwrap();

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert!(stored.synced);
        assert_eq!(stored.remote_id.as_deref(), Some("r-1"));
    }

    #[tokio::test]
    async fn test_update_does_not_touch_sync_state() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());
        let id = repo.insert(&clock_in("u1")).await.unwrap();
        ctx.store
            .run_in_transaction(move |conn| {
                Box::pin(async move { TimeRecords::mark_synced_in(conn, id, "r-1").await })
            })
            .await
            .unwrap();

        let mut stale = repo.get_by_id(id).await.unwrap().unwrap();
        stale.synced = false;
        stale.remote_id = None;
        repo.update(&stale).await.unwrap();

        let stored = repo.get_by_id(id).await.unwrap().unwrap();
        assert!(stored.synced);
        assert!(stored.remote_id.is_some());
    }

    #[tokio::test]
    async fn test_insert_tracked_queues_entry() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());

        let id = repo.insert_tracked(&clock_in("u1")).await.unwrap();

        let pool = ctx.store.acquire().await.unwrap();
        let queued: Vec<(String, String)> =
            sqlx::query_as("SELECT entity_type, entity_id FROM sync_queue")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(queued, vec![("TimeRecord".to_string(), id.to_string())]);
        assert_eq!(repo.unsynced().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_tracked_of_missing_row_queues_nothing() {
        let ctx = test_store();
        let repo = TimeRecords::new(ctx.store.clone());

        let mut ghost = clock_in("u1");
        ghost.id = Some(404);
        assert_eq!(repo.update_tracked(&ghost).await.unwrap(), 0);

        let pool = ctx.store.acquire().await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_queue")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
