use sqlx::FromRow;

use super::repository::{format_timestamp, parse_timestamp, EntityCodec, Predicate, Repository, SqlValue};
use crate::error::StoreError;
use crate::models::User;

#[derive(Debug, FromRow)]
pub struct UserRow {
    id: i64,
    user_id: String,
    phone_number: String,
    auth_token: Option<String>,
    token_expiry: Option<String>,
}

pub struct UserCodec;

impl EntityCodec for UserCodec {
    type Model = User;
    type Row = UserRow;

    const TABLE: &'static str = "users";
    const COLUMNS: &'static [&'static str] = &["user_id", "phone_number", "auth_token", "token_expiry"];

    fn id(model: &User) -> Option<i64> {
        model.id
    }

    fn set_id(model: &mut User, id: i64) {
        model.id = Some(id);
    }

    fn encode(model: &User) -> Vec<SqlValue> {
        vec![
            model.user_id.clone().into(),
            model.phone_number.clone().into(),
            model.auth_token.clone().into(),
            model.token_expiry.as_ref().map(format_timestamp).into(),
        ]
    }

    fn decode(row: UserRow) -> Result<User, StoreError> {
        let token_expiry = row
            .token_expiry
            .as_deref()
            .map(|value| parse_timestamp(Self::TABLE, value))
            .transpose()?;

        Ok(User {
            id: Some(row.id),
            user_id: row.user_id,
            phone_number: row.phone_number,
            auth_token: row.auth_token,
            token_expiry,
        })
    }
}

pub type UserRepository = Repository<UserCodec>;

impl Repository<UserCodec> {
    /// The signed-in user. The device holds at most one; if several rows
    /// exist the most recently inserted wins.
    pub async fn current(&self) -> Result<Option<User>, StoreError> {
        let mut found = self
            .get_by_predicate(&Predicate::new().order_by_desc("id").limit(1))
            .await?;
        Ok(found.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use crate::db::test_support::test_store;

    #[tokio::test]
    async fn test_current_user() {
        let ctx = test_store();
        let repo = UserRepository::new(ctx.store.clone());
        assert!(repo.current().await.unwrap().is_none());

        let expiry = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        repo.insert(&User::new("u1", "555-0100").with_token("tok", expiry))
            .await
            .unwrap();

        let user = repo.current().await.unwrap().unwrap();
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.auth_token.as_deref(), Some("tok"));
        assert_eq!(user.token_expiry, Some(expiry));
    }

    #[tokio::test]
    async fn test_user_id_is_unique() {
        let ctx = test_store();
        let repo = UserRepository::new(ctx.store.clone());
        repo.insert(&User::new("u1", "555-0100")).await.unwrap();

        assert!(repo.insert(&User::new("u1", "555-0199")).await.is_err());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sign_out_clears_token() {
        let ctx = test_store();
        let repo = UserRepository::new(ctx.store.clone());
        let id = repo
            .insert(&User::new("u1", "555-0100").with_token("tok", Utc::now()))
            .await
            .unwrap();

        let mut user = repo.get_by_id(id).await.unwrap().unwrap();
        user.auth_token = None;
        user.token_expiry = None;
        repo.update(&user).await.unwrap();

        let user = repo.current().await.unwrap().unwrap();
        assert!(user.auth_token.is_none());
        assert!(user.token_expiry.is_none());
    }
}
