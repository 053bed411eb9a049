//! REST collaborators: wire types, the `Api` seam, and the production
//! `reqwest` implementation.
//!
//! The engine never talks HTTP directly; everything goes through `Api` so
//! tests can install a scripted implementation via the slot on the `App`
//! handle.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 401 from any endpoint: the credential is expired or missing. Fatal for
    /// the session, never retried.
    #[error("credential expired or missing")]
    Unauthorized,
    #[error("request failed with status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Message record as it appears in every collaborator response and push frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub is_notification: bool,
}

impl MessageRecord {
    /// The conversation partner for this message, seen from `user_id`.
    pub fn other_participant(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.recipient_id
        } else {
            &self.sender_id
        }
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id == user_id
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub picture: Option<String>,
    /// Ids the contact has in their own directory; the mutual flag is derived
    /// from this list containing the current user.
    #[serde(default)]
    pub contacts: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    #[serde(default)]
    pub picture: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
}

/// Delete responses wrap the updated record.
#[derive(Debug, Deserialize)]
struct DeleteResponse {
    data: MessageRecord,
}

#[async_trait]
pub trait Api: Send + Sync + 'static {
    async fn fetch_me(&self) -> Result<UserProfile, ApiError>;
    async fn fetch_contacts(&self) -> Result<Vec<ContactRecord>, ApiError>;
    async fn fetch_messages(&self, contact_id: &str) -> Result<Vec<MessageRecord>, ApiError>;
    async fn send_message(&self, request: &SendMessageRequest) -> Result<MessageRecord, ApiError>;
    async fn delete_message(&self, message_id: &str) -> Result<MessageRecord, ApiError>;
}

/// Slot the `App` handle exposes so tests can swap the collaborator out
/// before dispatching `StartSession`.
pub type SharedApi = Arc<RwLock<Option<Arc<dyn Api>>>>;

pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn fetch_me(&self) -> Result<UserProfile, ApiError> {
        let response = self
            .http
            .get(self.endpoint("/profile/me"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn fetch_contacts(&self) -> Result<Vec<ContactRecord>, ApiError> {
        let response = self
            .http
            .get(self.endpoint("/profile/all-users"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn fetch_messages(&self, contact_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/messages/{contact_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<MessageRecord, ApiError> {
        let response = self
            .http
            .post(self.endpoint("/messages/send"))
            .bearer_auth(&self.token)
            .json(request)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_message(&self, message_id: &str) -> Result<MessageRecord, ApiError> {
        let response = self
            .http
            .delete(self.endpoint(&format!("/messages/{message_id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        let body: DeleteResponse = Self::check(response).await?.json().await?;
        Ok(body.data)
    }
}
