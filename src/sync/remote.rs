//! Push side of the backend API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use super::{EntityType, SyncError};
use crate::config::SyncConfig;

/// Backend acknowledgement of a created entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReceipt {
    pub remote_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    /// Network trouble or a server-side error. Retried with backoff.
    #[error("transient push failure: {0}")]
    Transient(String),
    /// The backend refused the data. Not retried until the entity changes.
    #[error("push rejected: {0}")]
    Rejected(String),
}

/// Sends one entity to the backend.
#[async_trait]
pub trait RemotePush: Send + Sync {
    async fn push(&self, entity_type: EntityType, payload: &Value)
        -> Result<PushReceipt, PushError>;
}

/// Classifies a non-success HTTP status. Auth failures are transient: the
/// payload is fine and the push succeeds once credentials are fixed.
pub fn classify_status(status: StatusCode, body: &str) -> PushError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        PushError::Transient(message)
    } else {
        PushError::Rejected(message)
    }
}

/// Reads the backend id out of a creation response. Ids may be strings or
/// numbers.
pub fn remote_id_from_body(body: &Value) -> Option<String> {
    match body.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// [`RemotePush`] over HTTPS: `POST {server_url}/api/{collection}` with a
/// bearer token.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    server_url: String,
    api_key: String,
}

impl HttpRemote {
    pub fn new(
        server_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Configuration(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    /// Builds the adapter from config. Fails when the server URL or API key
    /// is missing.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let server_url = config
            .server_url
            .clone()
            .ok_or_else(|| SyncError::Configuration("add sync.server_url to config".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| SyncError::Configuration("add sync.api_key to config".to_string()))?;

        Self::new(
            server_url,
            api_key,
            Duration::from_secs(config.push_timeout_secs),
        )
    }

    pub fn endpoint(&self, entity_type: EntityType) -> String {
        format!("{}/api/{}", self.server_url, entity_type.api_path())
    }
}

#[async_trait]
impl RemotePush for HttpRemote {
    async fn push(&self, entity_type: EntityType, payload: &Value) -> Result<PushReceipt, PushError> {
        let response = self
            .client
            .post(self.endpoint(entity_type))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| PushError::Transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| PushError::Transient(format!("unreadable response: {}", e)))?;

        remote_id_from_body(&body)
            .map(|remote_id| PushReceipt { remote_id })
            .ok_or_else(|| PushError::Transient("response carried no id".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_status() {
        for code in [401, 403, 408, 429, 500, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(
                matches!(classify_status(status, ""), PushError::Transient(_)),
                "{code} should be transient"
            );
        }
        for code in [400, 404, 409, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert!(
                matches!(classify_status(status, "bad"), PushError::Rejected(_)),
                "{code} should be rejected"
            );
        }
    }

    #[test]
    fn test_remote_id_from_body() {
        assert_eq!(remote_id_from_body(&json!({"id": "abc"})).as_deref(), Some("abc"));
        assert_eq!(remote_id_from_body(&json!({"id": 42})).as_deref(), Some("42"));
        assert_eq!(remote_id_from_body(&json!({"id": ""})), None);
        assert_eq!(remote_id_from_body(&json!({"ok": true})), None);
    }

    #[test]
    fn test_from_config_requires_url_and_key() {
        let mut config = SyncConfig::default();
        assert!(matches!(
            HttpRemote::from_config(&config),
            Err(SyncError::Configuration(_))
        ));

        config.server_url = Some("https://ops.example.com/".to_string());
        config.api_key = Some("key".to_string());
        let remote = HttpRemote::from_config(&config).unwrap();
        assert_eq!(
            remote.endpoint(EntityType::CheckpointVerification),
            "https://ops.example.com/api/checkpoint-verifications"
        );
    }
}
