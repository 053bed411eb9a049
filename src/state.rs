use serde::{Deserialize, Serialize};

/// Full engine snapshot published to the presentation layer.
///
/// Every mutation inside the core bumps `rev` and re-publishes the whole
/// snapshot; the presentation layer reconciles against `rev` and never
/// observes a partially applied change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppState {
    pub rev: u64,
    pub auth: AuthState,
    pub busy: BusyState,
    pub contact_list: Vec<ContactSummary>,
    pub current_conversation: Option<ConversationViewState>,
    pub search_query: String,
    /// True once push reconnection attempts are exhausted and polling is the
    /// only delivery path. Informational, not an error.
    pub channel_degraded: bool,
    pub banner: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            auth: AuthState::LoggedOut,
            busy: BusyState::idle(),
            contact_list: vec![],
            current_conversation: None,
            search_query: String::new(),
            channel_degraded: false,
            banner: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthState {
    LoggedOut,
    LoggedIn { user_id: String, name: String },
}

/// "In flight" flags for operations the UI should reflect while they run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyState {
    /// Initial load in progress: contact list plus the per-contact history
    /// fan-out. Cleared once every fetch has resolved, success or failure.
    pub loading: bool,
    pub deleting: bool,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            loading: false,
            deleting: false,
        }
    }
}

/// One row of the recency-ordered sidebar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSummary {
    pub contact_id: String,
    pub name: String,
    pub phone_number: String,
    pub picture: Option<String>,
    /// True iff this contact's own directory contains the current user.
    pub is_mutual: bool,
    pub last_message: Option<String>,
    /// Epoch milliseconds of the newest message, if any.
    pub last_message_at: Option<i64>,
    /// The newest message was soft-deleted; render a placeholder preview.
    pub last_message_deleted: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationViewState {
    pub contact_id: String,
    pub name: String,
    pub phone_number: String,
    pub picture: Option<String>,
    pub is_mutual: bool,
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender_id: String,
    pub content: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub is_mine: bool,
    pub deleted: bool,
    /// System-generated annotation, rendered centered rather than as a bubble.
    pub is_notification: bool,
    pub delivery: MessageDeliveryState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
    Failed { reason: String },
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
