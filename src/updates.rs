use crate::api::{ContactRecord, MessageRecord, UserProfile};
use crate::state::AppState;
use crate::AppAction;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<SessionEvent>),
}

/// An internal event stamped with the session epoch it was produced under.
///
/// Adapter tasks outlive session switches (in-flight requests are never
/// cancelled), so the core drops events whose epoch no longer matches instead
/// of merging one session's data into another. `epoch: None` binds the event
/// to whatever session is live, which is what the test injection seams use.
#[derive(Debug)]
pub struct SessionEvent {
    pub(crate) epoch: Option<u64>,
    pub(crate) event: InternalEvent,
}

impl SessionEvent {
    pub(crate) fn scoped(epoch: u64, event: InternalEvent) -> Self {
        Self {
            epoch: Some(epoch),
            event,
        }
    }

    pub(crate) fn unscoped(event: InternalEvent) -> Self {
        Self { epoch: None, event }
    }
}

#[derive(Debug)]
pub enum InternalEvent {
    // Initial loader
    ProfileLoaded {
        user: UserProfile,
    },
    ContactsLoaded {
        contacts: Vec<ContactRecord>,
    },
    /// Every per-contact history fetch of the initial load has resolved,
    /// success or failure.
    InitialLoadDone,

    // Shared by the initial loader and the poller
    HistoryFetched {
        contact_id: String,
        messages: Vec<MessageRecord>,
    },
    FetchFailed {
        contact_id: Option<String>,
        error: String,
    },
    AuthExpired,

    // Push channel
    PushMessage {
        message: MessageRecord,
    },
    ContactAdded {
        contact: ContactRecord,
    },
    ChannelStatus {
        connected: bool,
        degraded: bool,
    },

    // Optimistic sender results
    SendDispatched {
        contact_id: String,
        provisional_id: String,
    },
    SendCompleted {
        contact_id: String,
        provisional_id: String,
        message: MessageRecord,
    },
    SendFailed {
        contact_id: String,
        provisional_id: String,
        error: String,
    },

    // Delete requester result (one event per batch)
    DeleteResults {
        contact_id: String,
        deleted: Vec<MessageRecord>,
        failed: Vec<(String, String)>,
    },
}
