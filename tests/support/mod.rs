#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parley_core::{
    Api, ApiError, ContactRecord, MessageRecord, SendMessageRequest, UserProfile,
};

pub fn write_config(data_dir: &str) {
    let path = std::path::Path::new(data_dir).join("parley_config.json");
    let v = serde_json::json!({
        "disable_network": true,
        "poll_interval_secs": 1,
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

pub fn user(id: &str, name: &str) -> UserProfile {
    UserProfile {
        id: id.to_string(),
        name: name.to_string(),
        phone_number: format!("{id}-phone"),
        picture: None,
    }
}

pub fn contact(id: &str, name: &str, phone: &str, contacts: &[&str]) -> ContactRecord {
    ContactRecord {
        id: id.to_string(),
        name: name.to_string(),
        phone_number: phone.to_string(),
        picture: None,
        contacts: contacts.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn msg(id: &str, from: &str, to: &str, at_secs: i64, content: &str) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        sender_id: from.to_string(),
        recipient_id: to.to_string(),
        content: content.to_string(),
        created_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
        deleted: false,
        is_notification: false,
    }
}

/// Scripted REST collaborator. Histories are keyed by contact id; sends
/// append the server-assigned record to the recipient's history, like the
/// real collaborator persisting it.
pub struct MockApi {
    me: UserProfile,
    contacts: Mutex<Vec<ContactRecord>>,
    histories: Mutex<HashMap<String, Vec<MessageRecord>>>,
    fail_history: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
    fail_send: AtomicBool,
    unauthorized: AtomicBool,
    next_id: AtomicU64,
    pub history_fetches: AtomicU64,
    pub sent: Mutex<Vec<SendMessageRequest>>,
}

impl MockApi {
    pub fn new(me: UserProfile) -> Self {
        Self {
            me,
            contacts: Mutex::new(vec![]),
            histories: Mutex::new(HashMap::new()),
            fail_history: Mutex::new(HashSet::new()),
            fail_delete: Mutex::new(HashSet::new()),
            fail_send: AtomicBool::new(false),
            unauthorized: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            history_fetches: AtomicU64::new(0),
            sent: Mutex::new(vec![]),
        }
    }

    pub fn add_contact(&self, contact: ContactRecord, history: Vec<MessageRecord>) {
        self.histories
            .lock()
            .unwrap()
            .insert(contact.id.clone(), history);
        self.contacts.lock().unwrap().push(contact);
    }

    pub fn append_history(&self, contact_id: &str, message: MessageRecord) {
        self.histories
            .lock()
            .unwrap()
            .entry(contact_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn fail_history_for(&self, contact_id: &str) {
        self.fail_history
            .lock()
            .unwrap()
            .insert(contact_id.to_string());
    }

    pub fn clear_history_failures(&self) {
        self.fail_history.lock().unwrap().clear();
    }

    pub fn fail_delete_for(&self, message_id: &str) {
        self.fail_delete
            .lock()
            .unwrap()
            .insert(message_id.to_string());
    }

    pub fn set_fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.unauthorized.store(unauthorized, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> u64 {
        self.history_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Api for MockApi {
    async fn fetch_me(&self) -> Result<UserProfile, ApiError> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        Ok(self.me.clone())
    }

    async fn fetch_contacts(&self) -> Result<Vec<ContactRecord>, ApiError> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        Ok(self.contacts.lock().unwrap().clone())
    }

    async fn fetch_messages(&self, contact_id: &str) -> Result<Vec<MessageRecord>, ApiError> {
        self.history_fetches.fetch_add(1, Ordering::SeqCst);
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        if self.fail_history.lock().unwrap().contains(contact_id) {
            return Err(ApiError::Status(500));
        }
        Ok(self
            .histories
            .lock()
            .unwrap()
            .get(contact_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(&self, request: &SendMessageRequest) -> Result<MessageRecord, ApiError> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(ApiError::Status(500));
        }
        self.sent.lock().unwrap().push(request.clone());
        let record = MessageRecord {
            id: format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            sender_id: request.sender_id.clone(),
            recipient_id: request.recipient_id.clone(),
            content: request.content.clone(),
            created_at: Utc::now(),
            deleted: false,
            is_notification: false,
        };
        self.append_history(&request.recipient_id, record.clone());
        Ok(record)
    }

    async fn delete_message(&self, message_id: &str) -> Result<MessageRecord, ApiError> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        if self.fail_delete.lock().unwrap().contains(message_id) {
            return Err(ApiError::Status(500));
        }
        let mut histories = self.histories.lock().unwrap();
        for history in histories.values_mut() {
            if let Some(m) = history.iter_mut().find(|m| m.id == message_id) {
                m.deleted = true;
                m.content.clear();
                return Ok(m.clone());
            }
        }
        Err(ApiError::Status(404))
    }
}
