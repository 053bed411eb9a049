mod actions;
mod api;
mod core;
mod logging;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use api::{
    Api, ApiError, ContactRecord, HttpApi, MessageRecord, SendMessageRequest, UserProfile,
};
pub use state::{
    AppState, AuthState, BusyState, ChatMessage, ContactSummary, ConversationViewState,
    MessageDeliveryState,
};
pub use updates::AppUpdate;

use api::SharedApi;
use updates::{CoreMsg, InternalEvent, SessionEvent};

/// Platform-side callback receiving every state snapshot the core publishes.
pub trait Reconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Handle to the engine. Construct once, dispatch actions, observe state.
///
/// All engine work happens on a dedicated actor thread; `dispatch` never
/// blocks the caller.
pub struct App {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    api_slot: SharedApi,
}

impl App {
    pub fn new(data_dir: String) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, "App::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let api_slot: SharedApi = Arc::new(RwLock::new(None));

        // Actor loop thread (single-threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let api_slot_for_core = api_slot.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                api_slot_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            api_slot,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(guard) => guard.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block the caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn Reconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split the stream.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}

impl App {
    /// Installs a scripted REST collaborator, picked up by the next
    /// `StartSession`.
    pub fn set_api_for_tests(&self, api: Arc<dyn Api>) {
        match self.api_slot.write() {
            Ok(mut slot) => *slot = Some(api),
            Err(poison) => *poison.into_inner() = Some(api),
        }
    }

    /// Feeds a push-delivered message into the live session, as if it arrived
    /// over the channel.
    pub fn inject_push_message_for_tests(&self, message: MessageRecord) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            SessionEvent::unscoped(InternalEvent::PushMessage { message }),
        )));
    }

    /// Feeds a push-delivered contact (friend request accepted) into the live
    /// session.
    pub fn inject_push_contact_for_tests(&self, contact: ContactRecord) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            SessionEvent::unscoped(InternalEvent::ContactAdded { contact }),
        )));
    }

    /// Overrides the push-channel status seen by the live session.
    pub fn inject_channel_status_for_tests(&self, connected: bool, degraded: bool) {
        let _ = self.core_tx.send(CoreMsg::Internal(Box::new(
            SessionEvent::unscoped(InternalEvent::ChannelStatus {
                connected,
                degraded,
            }),
        )));
    }
}
