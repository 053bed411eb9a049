// Session lifecycle + the initial load fan-out.

use futures_util::stream::{FuturesUnordered, StreamExt};

use super::*;

pub(super) struct Session {
    pub(super) api: Arc<dyn Api>,
    pub(super) user: Option<UserProfile>,
    /// Cleared on teardown so spawned tasks stop producing events; the epoch
    /// stamp on each event is the authoritative staleness guard.
    pub(super) alive: Arc<AtomicBool>,
    /// Present once the push listener is up; the socket path for optimistic
    /// sends.
    pub(super) outbound: Option<flume::Sender<OutboundSend>>,
    pub(super) socket_connected: bool,
}

impl AppCore {
    pub(super) fn start_session(&mut self, token: String) {
        // Tear down and reset first so a session started over another one
        // never inherits its predecessor's data.
        self.stop_session();
        self.clear_session_state();

        let api: Arc<dyn Api> = match self.api_override() {
            Some(api) => api,
            None => Arc::new(HttpApi::new(self.api_url(), token)),
        };
        let alive = Arc::new(AtomicBool::new(true));

        self.session = Some(Session {
            api: api.clone(),
            user: None,
            alive: alive.clone(),
            outbound: None,
            socket_connected: false,
        });

        self.state.busy.loading = true;
        self.emit_state();

        self.spawn_initial_load(api, alive);
    }

    pub(super) fn stop_session(&mut self) {
        // Invalidate anything still in flight: events stamped with the old
        // epoch are dropped on arrival.
        self.epoch = self.epoch.wrapping_add(1);
        // Dropping the active slot aborts the poller; dropping the outbound
        // sender ends the push task's send loop.
        self.active = None;
        if let Some(session) = self.session.take() {
            session.alive.store(false, Ordering::SeqCst);
        }
    }

    /// Fan-out load: profile, then the contact list, then every contact's
    /// history as independent fetches. Per-contact failures are isolated and
    /// reported individually; they never abort the rest of the load. Failed
    /// contacts are only retried when something requests them again (opening
    /// the conversation starts the poller, which re-fetches).
    fn spawn_initial_load(&self, api: Arc<dyn Api>, alive: Arc<AtomicBool>) {
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

            let user = match api.fetch_me().await {
                Ok(user) => user,
                Err(ApiError::Unauthorized) => {
                    emit(InternalEvent::AuthExpired);
                    return;
                }
                Err(e) => {
                    emit(InternalEvent::FetchFailed {
                        contact_id: None,
                        error: e.to_string(),
                    });
                    emit(InternalEvent::InitialLoadDone);
                    return;
                }
            };
            emit(InternalEvent::ProfileLoaded { user });

            let contacts = match api.fetch_contacts().await {
                Ok(contacts) => contacts,
                Err(ApiError::Unauthorized) => {
                    emit(InternalEvent::AuthExpired);
                    return;
                }
                Err(e) => {
                    emit(InternalEvent::FetchFailed {
                        contact_id: None,
                        error: e.to_string(),
                    });
                    emit(InternalEvent::InitialLoadDone);
                    return;
                }
            };
            tracing::info!(count = contacts.len(), "contact list loaded");
            emit(InternalEvent::ContactsLoaded {
                contacts: contacts.clone(),
            });

            let mut fetches: FuturesUnordered<_> = contacts
                .iter()
                .map(|contact| {
                    let api = api.clone();
                    let contact_id = contact.id.clone();
                    async move {
                        let result = api.fetch_messages(&contact_id).await;
                        (contact_id, result)
                    }
                })
                .collect();

            while let Some((contact_id, result)) = fetches.next().await {
                if !alive.load(Ordering::SeqCst) {
                    return;
                }
                match result {
                    Ok(messages) => emit(InternalEvent::HistoryFetched {
                        contact_id,
                        messages,
                    }),
                    Err(ApiError::Unauthorized) => {
                        emit(InternalEvent::AuthExpired);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(contact_id = %contact_id, %e, "history fetch failed");
                        emit(InternalEvent::FetchFailed {
                            contact_id: Some(contact_id),
                            error: e.to_string(),
                        });
                    }
                }
            }

            emit(InternalEvent::InitialLoadDone);
        });
    }
}
