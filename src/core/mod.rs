mod config;
mod poller;
mod push;
mod recency;
mod session;
mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use flume::Sender;
use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::actions::AppAction;
use crate::api::{
    Api, ApiError, ContactRecord, HttpApi, MessageRecord, SendMessageRequest, SharedApi,
    UserProfile,
};
use crate::state::{
    now_millis, AppState, AuthState, BusyState, ChatMessage, ContactSummary,
    ConversationViewState, MessageDeliveryState,
};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent, SessionEvent};

use config::AppConfig;
use poller::PollerHandle;
use push::OutboundSend;
use recency::RecencyIndex;
use session::Session;
use store::MessageStore;

/// The selection controller's `Active` state. Dropping this releases the
/// poll timer, so every way of leaving the conversation (switching, closing,
/// logout, auth expiry) tears it down through the same path.
struct ActiveConversation {
    contact_id: String,
    #[allow(dead_code)]
    poller: PollerHandle,
}

/// Single-writer core: every merge event and every user action is processed
/// to completion, one at a time, on the actor thread that owns this value.
/// Adapter tasks run on the embedded runtime and only ever report back
/// through the actor mailbox.
pub struct AppCore {
    state: AppState,
    rev: u64,

    update_tx: Sender<AppUpdate>,
    core_tx: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: AppConfig,
    runtime: tokio::runtime::Runtime,
    api_slot: SharedApi,

    session: Option<Session>,
    /// Bumped on every session start/stop; events stamped with an older epoch
    /// are dropped on arrival.
    epoch: u64,

    store: MessageStore,
    recency: RecencyIndex,
    /// Directory mirror, keyed by contact id. Owned by the directory
    /// collaborator; this is a read cache for projections.
    contacts: HashMap<String, ContactRecord>,
    active: Option<ActiveConversation>,

    /// contact id -> message id -> delivery, layered over the store when
    /// projecting the open conversation. Only optimistic sends get entries.
    delivery_overrides: HashMap<String, HashMap<String, MessageDeliveryState>>,
    /// Keeps optimistic timestamps strictly increasing across rapid sends so
    /// ordering stays deterministic.
    last_outgoing_millis: i64,
}

impl AppCore {
    pub fn new(
        update_tx: Sender<AppUpdate>,
        core_tx: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        api_slot: SharedApi,
    ) -> Self {
        let config = config::load_app_config(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            update_tx,
            core_tx,
            shared_state,
            config,
            runtime,
            api_slot,
            session: None,
            epoch: 0,
            store: MessageStore::default(),
            recency: RecencyIndex::default(),
            contacts: HashMap::new(),
            active: None,
            delivery_overrides: HashMap::new(),
            last_outgoing_millis: 0,
        };

        // Ensure App::state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut guard) => *guard = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_tx.send(AppUpdate::FullState(snapshot));
    }

    fn banner(&mut self, message: impl Into<String>) {
        // Kept in state until explicitly cleared so a snapshot resync cannot
        // lose it.
        self.state.banner = Some(message.into());
        self.emit_state();
    }

    fn current_user_id(&self) -> Option<String> {
        self.session
            .as_ref()
            .and_then(|s| s.user.as_ref())
            .map(|u| u.id.clone())
    }

    fn api_override(&self) -> Option<Arc<dyn Api>> {
        match self.api_slot.read() {
            Ok(guard) => guard.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log the action payload: it can carry tokens and text.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(event) => self.handle_internal(*event),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::StartSession { token } => {
                let token = token.trim().to_string();
                if token.is_empty() {
                    self.banner("Missing credential");
                    return;
                }
                self.start_session(token);
            }
            AppAction::Logout => {
                self.stop_session();
                self.clear_session_state();
            }
            AppAction::SelectConversation { contact_id } => {
                let Some((api, alive)) = self.session_handles() else {
                    self.banner("Please sign in first");
                    return;
                };
                if !self.contacts.contains_key(&contact_id) {
                    self.banner("Contact not found");
                    return;
                }
                let poller = self.start_poller(&contact_id, api, alive);
                self.active = Some(ActiveConversation {
                    contact_id: contact_id.clone(),
                    poller,
                });
                self.refresh_current_conversation(&contact_id);
            }
            AppAction::CloseConversation => {
                self.active = None;
                if self.state.current_conversation.is_some() {
                    self.state.current_conversation = None;
                    self.emit_state();
                }
            }
            AppAction::SendMessage { content } => self.send_message(content),
            AppAction::DeleteMessages { message_ids } => self.delete_messages(message_ids),
            AppAction::Search { query } => {
                self.state.search_query = query;
                self.refresh_contact_list();
            }
            AppAction::ClearBanner => {
                if self.state.banner.is_some() {
                    self.state.banner = None;
                    self.emit_state();
                }
            }
        }
    }

    fn handle_internal(&mut self, event: SessionEvent) {
        if let Some(epoch) = event.epoch {
            if epoch != self.epoch {
                tracing::debug!(epoch, current = self.epoch, "stale session event dropped");
                return;
            }
        }

        match event.event {
            InternalEvent::ProfileLoaded { user } => {
                tracing::info!(user_id = %user.id, "profile loaded");
                let user_id = user.id.clone();
                let name = user.name.clone();
                let alive = match self.session.as_mut() {
                    Some(session) => {
                        session.user = Some(user);
                        session.alive.clone()
                    }
                    None => return,
                };
                self.state.auth = AuthState::LoggedIn { user_id: user_id.clone(), name };

                if self.network_enabled() {
                    let (out_tx, out_rx) = flume::unbounded();
                    self.start_push_listener(user_id, out_rx, alive);
                    if let Some(session) = self.session.as_mut() {
                        session.outbound = Some(out_tx);
                    }
                }
                self.emit_state();
            }
            InternalEvent::ContactsLoaded { contacts } => {
                self.contacts = contacts.into_iter().map(|c| (c.id.clone(), c)).collect();
                self.refresh_contact_list();
            }
            InternalEvent::InitialLoadDone => {
                if self.state.busy.loading {
                    self.state.busy.loading = false;
                    self.emit_state();
                }
            }
            InternalEvent::HistoryFetched {
                contact_id,
                messages,
            } => {
                self.apply_merge(&contact_id, messages);
            }
            InternalEvent::FetchFailed { contact_id, error } => {
                tracing::warn!(?contact_id, %error, "fetch failed");
                self.banner(match contact_id {
                    Some(_) => "Failed to load messages".to_string(),
                    None => "Failed to load data".to_string(),
                });
            }
            InternalEvent::AuthExpired => {
                tracing::warn!("credential rejected; clearing session");
                self.stop_session();
                self.clear_session_state();
                self.banner("Session expired. Please sign in again.");
            }
            InternalEvent::PushMessage { message } => {
                let Some(user_id) = self.current_user_id() else {
                    return;
                };
                if !message.involves(&user_id) {
                    // Not for our room; defensive, the server filters already.
                    return;
                }
                let other = message.other_participant(&user_id).to_string();
                let is_active = self
                    .active
                    .as_ref()
                    .map(|a| a.contact_id == other)
                    .unwrap_or(false);
                if is_active {
                    self.apply_merge(&other, vec![message]);
                } else if self.recency.observe(&other, &message) {
                    // Outside the open conversation: only the sidebar moves.
                    self.refresh_contact_list();
                }
            }
            InternalEvent::ContactAdded { contact } => {
                if !self.contacts.contains_key(&contact.id) {
                    self.contacts.insert(contact.id.clone(), contact);
                    self.refresh_contact_list();
                }
            }
            InternalEvent::ChannelStatus {
                connected,
                degraded,
            } => {
                tracing::info!(connected, degraded, "push channel status");
                if let Some(session) = self.session.as_mut() {
                    session.socket_connected = connected;
                }
                if self.state.channel_degraded != degraded {
                    self.state.channel_degraded = degraded;
                    self.emit_state();
                }
            }
            InternalEvent::SendDispatched {
                contact_id,
                provisional_id,
            } => {
                self.set_delivery(&contact_id, &provisional_id, MessageDeliveryState::Sent);
                self.refresh_current_conversation_if_open(&contact_id);
            }
            InternalEvent::SendCompleted {
                contact_id,
                provisional_id,
                message,
            } => {
                self.set_delivery(&contact_id, &provisional_id, MessageDeliveryState::Sent);
                self.apply_merge(&contact_id, vec![message]);
                self.refresh_current_conversation_if_open(&contact_id);
            }
            InternalEvent::SendFailed {
                contact_id,
                provisional_id,
                error,
            } => {
                tracing::warn!(%error, "send failed");
                self.set_delivery(
                    &contact_id,
                    &provisional_id,
                    MessageDeliveryState::Failed { reason: error },
                );
                self.refresh_current_conversation_if_open(&contact_id);
                self.banner("Message not sent");
            }
            InternalEvent::DeleteResults {
                contact_id,
                deleted,
                failed,
            } => {
                self.state.busy.deleting = false;
                self.emit_state();
                let failures = failed.len();
                self.apply_merge(&contact_id, deleted);
                if failures > 0 {
                    let plural = if failures == 1 { "" } else { "s" };
                    self.banner(format!("Failed to delete {failures} message{plural}"));
                }
            }
        }
    }

    fn session_handles(&self) -> Option<(Arc<dyn Api>, Arc<AtomicBool>)> {
        self.session
            .as_ref()
            .map(|s| (s.api.clone(), s.alive.clone()))
    }

    fn set_delivery(&mut self, contact_id: &str, message_id: &str, delivery: MessageDeliveryState) {
        self.delivery_overrides
            .entry(contact_id.to_string())
            .or_default()
            .insert(message_id.to_string(), delivery);
    }

    /// The single path every observation takes into shared state: merge into
    /// the store, propagate the last-message pointer to the recency index,
    /// and refresh whichever projections the merge touched.
    fn apply_merge(&mut self, contact_id: &str, observed: Vec<MessageRecord>) {
        let outcome = self.store.merge(contact_id, observed);
        if outcome.last_message_changed {
            if let Some(last) = self.store.last_message(contact_id) {
                self.recency.observe(contact_id, last);
            }
            self.refresh_contact_list();
        }
        if outcome.changed {
            self.refresh_current_conversation_if_open(contact_id);
        }
    }

    fn send_message(&mut self, content: String) {
        let content = content.trim().to_string();
        if content.is_empty() {
            return;
        }
        let Some(active_id) = self.active.as_ref().map(|a| a.contact_id.clone()) else {
            self.banner("Open a conversation first");
            return;
        };
        let Some(user_id) = self.current_user_id() else {
            self.banner("Please sign in first");
            return;
        };

        let ts = {
            let now = now_millis();
            if now <= self.last_outgoing_millis {
                self.last_outgoing_millis + 1
            } else {
                now
            }
        };
        self.last_outgoing_millis = ts;

        let provisional_id = format!("local-{}", uuid::Uuid::new_v4());
        let provisional = MessageRecord {
            id: provisional_id.clone(),
            sender_id: user_id.clone(),
            recipient_id: active_id.clone(),
            content: content.clone(),
            created_at: DateTime::<Utc>::from_timestamp_millis(ts).unwrap_or_else(Utc::now),
            deleted: false,
            is_notification: false,
        };

        // Optimistic display first; delivery reconciles against this record
        // by id, or coexists with it when the server assigns its own.
        self.set_delivery(&active_id, &provisional_id, MessageDeliveryState::Pending);
        self.apply_merge(&active_id, vec![provisional]);

        let request = SendMessageRequest {
            sender_id: user_id,
            recipient_id: active_id.clone(),
            content,
        };

        let socket = self.session.as_ref().and_then(|s| {
            if s.socket_connected {
                s.outbound.clone()
            } else {
                None
            }
        });
        if let Some(outbound) = socket {
            let queued = outbound.send(OutboundSend {
                contact_id: active_id.clone(),
                provisional_id: provisional_id.clone(),
                request: request.clone(),
            });
            if queued.is_ok() {
                return;
            }
            // Socket task is gone; fall through to the one-shot request.
        }

        let Some((api, alive)) = self.session_handles() else {
            return;
        };
        let tx = self.core_tx.clone();
        let epoch = self.epoch;
        self.runtime.spawn(async move {
            let emit = |event: InternalEvent| {
                if alive.load(Ordering::SeqCst) {
                    let _ = tx.send(CoreMsg::Internal(Box::new(SessionEvent::scoped(
                        epoch, event,
                    ))));
                }
            };
            match api.send_message(&request).await {
                Ok(message) => emit(InternalEvent::SendCompleted {
                    contact_id: active_id,
                    provisional_id,
                    message,
                }),
                Err(ApiError::Unauthorized) => emit(InternalEvent::AuthExpired),
                Err(e) => emit(InternalEvent::SendFailed {
                    contact_id: active_id,
                    provisional_id,
                    error: e.to_string(),
                }),
            }
        });
    }

    fn delete_messages(&mut self, message_ids: Vec<String>) {
        if message_ids.is_empty() {
            return;
        }
        let Some(active_id) = self.active.as_ref().map(|a| a.contact_id.clone()) else {
            return;
        };
        let Some((api, alive)) = self.session_handles() else {
            return;
        };

        self.state.busy.deleting = true;
        self.emit_state();

        let tx = self.core_tx.clone();
        let epoch = self.epoch;
        self.runtime.spawn(async move {
            let emit = |event: InternalEvent| {
                if alive.load(Ordering::SeqCst) {
                    let _ = tx.send(CoreMsg::Internal(Box::new(SessionEvent::scoped(
                        epoch, event,
                    ))));
                }
            };

            // One independent request per id; no atomicity across the batch.
            let mut requests: FuturesUnordered<_> = message_ids
                .into_iter()
                .map(|id| {
                    let api = api.clone();
                    async move {
                        let result = api.delete_message(&id).await;
                        (id, result)
                    }
                })
                .collect();

            let mut deleted = Vec::new();
            let mut failed = Vec::new();
            while let Some((id, result)) = requests.next().await {
                match result {
                    Ok(message) => deleted.push(message),
                    Err(ApiError::Unauthorized) => {
                        emit(InternalEvent::AuthExpired);
                        return;
                    }
                    Err(e) => failed.push((id, e.to_string())),
                }
            }

            emit(InternalEvent::DeleteResults {
                contact_id: active_id,
                deleted,
                failed,
            });
        });
    }

    fn refresh_contact_list(&mut self) {
        let me = self.current_user_id();
        let ordered = self
            .recency
            .ordered(self.contacts.values(), &self.state.search_query);
        let list: Vec<ContactSummary> = ordered
            .iter()
            .filter_map(|id| self.contacts.get(id))
            .map(|contact| {
                let last = self.recency.last(&contact.id);
                ContactSummary {
                    contact_id: contact.id.clone(),
                    name: contact.name.clone(),
                    phone_number: contact.phone_number.clone(),
                    picture: contact.picture.clone(),
                    is_mutual: me
                        .as_deref()
                        .map(|m| contact.contacts.iter().any(|c| c == m))
                        .unwrap_or(false),
                    last_message: last.map(|l| l.content.clone()),
                    last_message_at: last.map(|l| l.created_at.timestamp_millis()),
                    last_message_deleted: last.map(|l| l.deleted).unwrap_or(false),
                }
            })
            .collect();
        self.state.contact_list = list;
        self.emit_state();
    }

    fn refresh_current_conversation_if_open(&mut self, contact_id: &str) {
        let open = self
            .active
            .as_ref()
            .map(|a| a.contact_id == contact_id)
            .unwrap_or(false);
        if open {
            self.refresh_current_conversation(contact_id);
        }
    }

    fn refresh_current_conversation(&mut self, contact_id: &str) {
        let Some(user_id) = self.current_user_id() else {
            return;
        };
        let Some(contact) = self.contacts.get(contact_id) else {
            if self.state.current_conversation.is_some() {
                self.state.current_conversation = None;
                self.emit_state();
            }
            return;
        };

        let overrides = self.delivery_overrides.get(contact_id);
        let messages: Vec<ChatMessage> = self
            .store
            .messages(contact_id)
            .iter()
            .map(|m| ChatMessage {
                id: m.id.clone(),
                sender_id: m.sender_id.clone(),
                content: m.content.clone(),
                timestamp: m.created_at.timestamp_millis(),
                is_mine: m.sender_id == user_id,
                deleted: m.deleted,
                is_notification: m.is_notification,
                delivery: overrides
                    .and_then(|o| o.get(&m.id))
                    .cloned()
                    .unwrap_or(MessageDeliveryState::Sent),
            })
            .collect();

        let view = ConversationViewState {
            contact_id: contact.id.clone(),
            name: contact.name.clone(),
            phone_number: contact.phone_number.clone(),
            picture: contact.picture.clone(),
            is_mutual: contact.contacts.iter().any(|c| c == &user_id),
            messages,
        };
        self.state.current_conversation = Some(view);
        self.emit_state();
    }

    fn clear_session_state(&mut self) {
        self.store.clear();
        self.recency.clear();
        self.contacts.clear();
        self.delivery_overrides.clear();
        self.last_outgoing_millis = 0;
        self.state.auth = AuthState::LoggedOut;
        self.state.busy = BusyState::idle();
        self.state.contact_list.clear();
        self.state.current_conversation = None;
        self.state.search_query.clear();
        self.state.channel_degraded = false;
        self.emit_state();
    }
}
