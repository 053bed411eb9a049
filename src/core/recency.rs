// Contact ordering derived from per-conversation last-message pointers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::api::{ContactRecord, MessageRecord};

#[derive(Clone, Debug)]
pub(super) struct LastMessage {
    pub(super) message_id: String,
    pub(super) content: String,
    pub(super) created_at: DateTime<Utc>,
    pub(super) deleted: bool,
}

impl From<&MessageRecord> for LastMessage {
    fn from(m: &MessageRecord) -> Self {
        Self {
            message_id: m.id.clone(),
            content: m.content.clone(),
            created_at: m.created_at,
            deleted: m.deleted,
        }
    }
}

/// `contact id -> newest message` map plus the global ordering rule:
/// conversations sort descending by their newest message's timestamp, and
/// contacts without any message sort after all of those, in case-insensitive
/// name order. Recomputed in full on every update; contact counts are small.
#[derive(Default)]
pub(super) struct RecencyIndex {
    last: HashMap<String, LastMessage>,
}

impl RecencyIndex {
    /// Record `message` as the contact's newest if it is at least as new as
    /// the current pointer. An observation of the pointer's own id refreshes
    /// the mutable fields (a deleted newest message keeps its slot but flips
    /// its preview). Returns whether anything changed.
    pub(super) fn observe(&mut self, contact_id: &str, message: &MessageRecord) -> bool {
        match self.last.get_mut(contact_id) {
            Some(current) if current.message_id == message.id => {
                if current.content == message.content && current.deleted == message.deleted {
                    return false;
                }
                current.content = message.content.clone();
                current.deleted = message.deleted;
                true
            }
            Some(current) => {
                if (message.created_at, message.id.as_str())
                    > (current.created_at, current.message_id.as_str())
                {
                    *current = LastMessage::from(message);
                    true
                } else {
                    false
                }
            }
            None => {
                self.last
                    .insert(contact_id.to_string(), LastMessage::from(message));
                true
            }
        }
    }

    pub(super) fn last(&self, contact_id: &str) -> Option<&LastMessage> {
        self.last.get(contact_id)
    }

    /// Ordered contact ids for the sidebar. A non-empty `query` is matched
    /// case-insensitively against name or phone number; an empty query falls
    /// back to "has at least one message", so never-messaged contacts stay
    /// out of the default view but remain reachable through search.
    pub(super) fn ordered<'a>(
        &self,
        contacts: impl Iterator<Item = &'a ContactRecord>,
        query: &str,
    ) -> Vec<String> {
        let query = query.trim().to_lowercase();

        let mut with_message: Vec<(&'a ContactRecord, &LastMessage)> = Vec::new();
        let mut without_message: Vec<&'a ContactRecord> = Vec::new();
        for contact in contacts {
            let matches = if query.is_empty() {
                self.last.contains_key(&contact.id)
            } else {
                contact.name.to_lowercase().contains(&query)
                    || contact.phone_number.contains(&query)
            };
            if !matches {
                continue;
            }
            match self.last.get(&contact.id) {
                Some(last) => with_message.push((contact, last)),
                None => without_message.push(contact),
            }
        }

        with_message.sort_by(|a, b| {
            b.1.created_at
                .cmp(&a.1.created_at)
                .then_with(|| b.1.message_id.cmp(&a.1.message_id))
        });
        without_message.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));

        with_message
            .into_iter()
            .map(|(c, _)| c.id.clone())
            .chain(without_message.into_iter().map(|c| c.id.clone()))
            .collect()
    }

    pub(super) fn clear(&mut self) {
        self.last.clear();
    }
}
