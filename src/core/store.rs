// Per-conversation message sequences with the id-keyed merge entry point.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::api::MessageRecord;

/// What a merge did, so the caller knows which projections to refresh.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct MergeOutcome {
    /// Any record was inserted or mutated.
    pub(super) changed: bool,
    /// The conversation's newest message (or its preview-relevant fields)
    /// changed; the recency index must be told.
    pub(super) last_message_changed: bool,
}

/// Authoritative in-memory message store, one timeline per contact.
///
/// Every producer (initial load, poll, push, optimistic send, delete) funnels
/// through [`MessageStore::merge`], which makes overlapping, duplicate and
/// out-of-order delivery safe: records are keyed by id and mutated in place,
/// never removed, and inserts land at their `(created_at, id)` position.
#[derive(Default)]
pub(super) struct MessageStore {
    conversations: HashMap<String, Conversation>,
}

#[derive(Default)]
struct Conversation {
    /// Ascending by `(created_at, id)`.
    messages: Vec<MessageRecord>,
}

fn sort_key(m: &MessageRecord) -> (DateTime<Utc>, &str) {
    (m.created_at, m.id.as_str())
}

impl Conversation {
    fn merge_one(&mut self, observed: MessageRecord) -> bool {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == observed.id) {
            // Identity-keyed overwrite: mutable fields only, position kept.
            // This is both delete application and provisional/confirmed
            // reconciliation when the transport reuses the id.
            if existing.content == observed.content
                && existing.deleted == observed.deleted
                && existing.is_notification == observed.is_notification
            {
                return false;
            }
            existing.content = observed.content;
            existing.deleted = observed.deleted;
            existing.is_notification = observed.is_notification;
            return true;
        }

        // Append fast path for live traffic; binary-search insertion for
        // out-of-order backfill.
        let at = match self.messages.last() {
            Some(tail) if sort_key(&observed) >= sort_key(tail) => self.messages.len(),
            _ => self
                .messages
                .partition_point(|m| sort_key(m) <= sort_key(&observed)),
        };
        self.messages.insert(at, observed);
        true
    }

    fn last_fingerprint(&self) -> Option<(String, String, bool)> {
        self.messages
            .last()
            .map(|m| (m.id.clone(), m.content.clone(), m.deleted))
    }
}

impl MessageStore {
    /// The single merge entry point. Idempotent: re-merging an identical
    /// observation is a no-op.
    pub(super) fn merge(
        &mut self,
        contact_id: &str,
        observed: Vec<MessageRecord>,
    ) -> MergeOutcome {
        if observed.is_empty() {
            return MergeOutcome::default();
        }
        let conversation = self
            .conversations
            .entry(contact_id.to_string())
            .or_default();

        let before = conversation.last_fingerprint();
        let mut changed = false;
        for message in observed {
            changed |= conversation.merge_one(message);
        }
        let last_message_changed = changed && before != conversation.last_fingerprint();

        MergeOutcome {
            changed,
            last_message_changed,
        }
    }

    /// Soft-delete by id: `deleted = true`, content cleared, position and
    /// record preserved. Returns the owning contact id when the record exists.
    /// Idempotent.
    pub(super) fn delete(&mut self, message_id: &str) -> Option<String> {
        for (contact_id, conversation) in &mut self.conversations {
            if let Some(m) = conversation
                .messages
                .iter_mut()
                .find(|m| m.id == message_id)
            {
                m.deleted = true;
                m.content.clear();
                return Some(contact_id.clone());
            }
        }
        None
    }

    pub(super) fn messages(&self, contact_id: &str) -> &[MessageRecord] {
        self.conversations
            .get(contact_id)
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[])
    }

    pub(super) fn last_message(&self, contact_id: &str) -> Option<&MessageRecord> {
        self.conversations
            .get(contact_id)
            .and_then(|c| c.messages.last())
    }

    pub(super) fn clear(&mut self) {
        self.conversations.clear();
    }
}
