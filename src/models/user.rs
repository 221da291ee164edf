use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The signed-in user of this device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Option<i64>,
    pub user_id: String,
    pub phone_number: String,
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(user_id: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            id: None,
            user_id: user_id.into(),
            phone_number: phone_number.into(),
            auth_token: None,
            token_expiry: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        self.auth_token = Some(token.into());
        self.token_expiry = Some(expiry);
        self
    }

    /// True when a token is present and has not expired at `now`.
    pub fn has_valid_token(&self, now: DateTime<Utc>) -> bool {
        match (&self.auth_token, self.token_expiry) {
            (Some(_), Some(expiry)) => expiry > now,
            (Some(_), None) => true,
            _ => false,
        }
    }
}
