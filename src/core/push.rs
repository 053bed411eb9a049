// Push channel: websocket listener, outbound send queue, bounded reconnects.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::*;
use crate::api::ContactRecord;

/// One JSON object per text frame, `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub(super) enum ClientFrame {
    /// Subscribes this connection to the user's private room. Re-emitted
    /// after every reconnect.
    Join(String),
    SendMessage(SendMessageRequest),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub(super) enum ServerFrame {
    ReceiveMessage(MessageRecord),
    FriendRequestAccepted(ContactRecord),
    #[serde(other)]
    Unknown,
}

/// A message handed to the socket for delivery, with enough context to report
/// the outcome back against the optimistic record.
#[derive(Debug)]
pub(super) struct OutboundSend {
    pub(super) contact_id: String,
    pub(super) provisional_id: String,
    pub(super) request: SendMessageRequest,
}

impl AppCore {
    /// Connects the push channel for `user_id` and keeps it alive with a
    /// bounded number of fixed-delay reconnects. On exhaustion the task ends
    /// and reports degraded mode: polling remains the sole delivery path,
    /// which is not an error.
    pub(super) fn start_push_listener(
        &self,
        user_id: String,
        outbound_rx: flume::Receiver<OutboundSend>,
        alive: Arc<AtomicBool>,
    ) {
        let tx = self.core_tx.clone();
        let epoch = self.epoch;
        let ws_url = self.ws_url();
        let max_attempts = self.reconnect_attempts();
        let retry_delay = self.reconnect_delay();

        self.runtime.spawn(async move {
            let emit = |event: InternalEvent| {
                let _ = tx.send(CoreMsg::Internal(Box::new(SessionEvent::scoped(
                    epoch, event,
                ))));
            };

            let mut failures = 0u32;
            loop {
                if !alive.load(Ordering::SeqCst) {
                    return;
                }

                let mut ws = match connect_async(ws_url.as_str()).await {
                    Ok((ws, _)) => ws,
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(%e, attempt = failures, "push channel connect failed");
                        if failures >= max_attempts {
                            emit(InternalEvent::ChannelStatus {
                                connected: false,
                                degraded: true,
                            });
                            return;
                        }
                        tokio::time::sleep(retry_delay).await;
                        continue;
                    }
                };
                if let Ok(join) = serde_json::to_string(&ClientFrame::Join(user_id.clone())) {
                    if let Err(e) = ws.send(WsMessage::Text(join)).await {
                        failures += 1;
                        tracing::warn!(%e, attempt = failures, "push channel join failed");
                        if failures >= max_attempts {
                            emit(InternalEvent::ChannelStatus {
                                connected: false,
                                degraded: true,
                            });
                            return;
                        }
                        tokio::time::sleep(retry_delay).await;
                        continue;
                    }
                }
                failures = 0;
                tracing::info!(url = %ws_url, "push channel connected");
                emit(InternalEvent::ChannelStatus {
                    connected: true,
                    degraded: false,
                });

                loop {
                    tokio::select! {
                        frame = ws.next() => match frame {
                            Some(Ok(WsMessage::Text(text))) => decode_frame(&text, &emit),
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::warn!(%e, "push channel read failed");
                                break;
                            }
                        },
                        send = outbound_rx.recv_async() => match send {
                            Ok(send) => deliver(&mut ws, send, &emit).await,
                            // Sender dropped: the session is over.
                            Err(_) => return,
                        },
                    }
                    if !alive.load(Ordering::SeqCst) {
                        return;
                    }
                }

                emit(InternalEvent::ChannelStatus {
                    connected: false,
                    degraded: false,
                });
            }
        });
    }
}

fn decode_frame(text: &str, emit: &impl Fn(InternalEvent)) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(ServerFrame::ReceiveMessage(message)) => emit(InternalEvent::PushMessage { message }),
        Ok(ServerFrame::FriendRequestAccepted(contact)) => {
            emit(InternalEvent::ContactAdded { contact })
        }
        Ok(ServerFrame::Unknown) => {}
        Err(e) => tracing::debug!(%e, "unreadable push frame"),
    }
}

async fn deliver<S>(ws: &mut S, send: OutboundSend, emit: &impl Fn(InternalEvent))
where
    S: SinkExt<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match serde_json::to_string(&ClientFrame::SendMessage(send.request)) {
        Ok(text) => text,
        Err(e) => {
            emit(InternalEvent::SendFailed {
                contact_id: send.contact_id,
                provisional_id: send.provisional_id,
                error: e.to_string(),
            });
            return;
        }
    };
    match ws.send(WsMessage::Text(text)).await {
        Ok(()) => emit(InternalEvent::SendDispatched {
            contact_id: send.contact_id,
            provisional_id: send.provisional_id,
        }),
        Err(e) => emit(InternalEvent::SendFailed {
            contact_id: send.contact_id,
            provisional_id: send.provisional_id,
            error: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_message_frame_decodes_to_a_record() {
        let text = r#"{
            "event": "receiveMessage",
            "data": {
                "id": "m1",
                "senderId": "u1",
                "recipientId": "u2",
                "content": "hello",
                "createdAt": "2026-01-05T10:00:00Z"
            }
        }"#;
        match serde_json::from_str::<ServerFrame>(text).unwrap() {
            ServerFrame::ReceiveMessage(m) => {
                assert_eq!(m.id, "m1");
                assert_eq!(m.sender_id, "u1");
                assert!(!m.deleted);
                assert!(!m.is_notification);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn friend_request_accepted_frame_decodes_to_a_contact() {
        let text = r#"{
            "event": "friendRequestAccepted",
            "data": {"id": "u3", "name": "Carol", "phoneNumber": "555", "contacts": ["u1"]}
        }"#;
        match serde_json::from_str::<ServerFrame>(text).unwrap() {
            ServerFrame::FriendRequestAccepted(c) => {
                assert_eq!(c.id, "u3");
                assert_eq!(c.contacts, vec!["u1"]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_events_are_ignored() {
        let text = r#"{"event": "typingIndicator", "data": {"userId": "u1"}}"#;
        assert!(matches!(
            serde_json::from_str::<ServerFrame>(text).unwrap(),
            ServerFrame::Unknown
        ));
    }

    #[test]
    fn join_frame_matches_the_wire_shape() {
        let text = serde_json::to_string(&ClientFrame::Join("u1".into())).unwrap();
        assert_eq!(text, r#"{"event":"join","data":"u1"}"#);
    }
}
