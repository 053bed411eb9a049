// Interval re-fetch of the active conversation.

use super::*;

/// Abort-on-drop handle for the poll task. The controller only ever stores it
/// inside the active-conversation slot, so clearing or replacing that slot is
/// guaranteed to stop the timer no matter which path ended the selection.
pub(super) struct PollerHandle {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl AppCore {
    /// Re-fetches `contact_id`'s full history on a fixed interval. The first
    /// tick fires immediately, which doubles as the history fetch performed on
    /// selection. Fetch errors are surfaced but never stop the timer; the
    /// next tick is the only retry.
    pub(super) fn start_poller(
        &self,
        contact_id: &str,
        api: Arc<dyn Api>,
        alive: Arc<AtomicBool>,
    ) -> PollerHandle {
        let contact_id = contact_id.to_string();
        let tx = self.core_tx.clone();
        let epoch = self.epoch;
        let period = self.poll_interval();

        let task = self.runtime.spawn(async move {
            let emit = |event: InternalEvent| {
                let _ = tx.send(CoreMsg::Internal(Box::new(SessionEvent::scoped(
                    epoch, event,
                ))));
            };

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !alive.load(Ordering::SeqCst) {
                    return;
                }
                match api.fetch_messages(&contact_id).await {
                    Ok(messages) => emit(InternalEvent::HistoryFetched {
                        contact_id: contact_id.clone(),
                        messages,
                    }),
                    Err(ApiError::Unauthorized) => {
                        emit(InternalEvent::AuthExpired);
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(contact_id = %contact_id, %e, "poll fetch failed");
                        emit(InternalEvent::FetchFailed {
                            contact_id: Some(contact_id.clone()),
                            error: e.to_string(),
                        });
                    }
                }
            }
        });

        PollerHandle { task }
    }
}
