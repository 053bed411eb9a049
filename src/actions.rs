#[derive(Debug, Clone)]
pub enum AppAction {
    // Session
    StartSession { token: String },
    Logout,

    // Conversation selection
    SelectConversation { contact_id: String },
    CloseConversation,

    // Messaging (scoped to the active conversation)
    SendMessage { content: String },
    DeleteMessages { message_ids: Vec<String> },

    // Sidebar
    Search { query: String },

    // UI
    ClearBanner,
}

impl AppAction {
    /// Log-safe action tag (never includes payloads: they can carry bearer
    /// tokens and message text).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::StartSession { .. } => "StartSession",
            AppAction::Logout => "Logout",
            AppAction::SelectConversation { .. } => "SelectConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::DeleteMessages { .. } => "DeleteMessages",
            AppAction::Search { .. } => "Search",
            AppAction::ClearBanner => "ClearBanner",
        }
    }
}
