use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::domain::message::{ChatMessage, Role};
use crate::domain::user::{EmotionSample, FeedbackEntry, UserRecord};
use crate::storage::{StoreError, UserRecordStore, UserRecords};

const EMOTION_HISTORY_CAP: usize = 100;

/// In-memory cache of per-user records backed by a [`UserRecordStore`].
///
/// Every mutation touches one user's record inside one critical section.
/// Persistence is best-effort and never blocks the caller.
#[derive(Clone)]
pub struct ConversationStore {
    records: Arc<Mutex<HashMap<String, UserRecord>>>,
    backend: Arc<dyn UserRecordStore>,
    persist_lock: Arc<tokio::sync::Mutex<()>>,
    max_history: usize,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn UserRecordStore>, max_history: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            backend,
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
            max_history: max_history.max(1),
        }
    }

    /// Number of history entries kept per user: one user and one assistant
    /// message per exchange.
    pub fn history_cap(&self) -> usize {
        self.max_history * 2
    }

    pub async fn load(&self) -> Result<usize, StoreError> {
        let loaded = self.backend.load_all().await?;
        let cap = self.history_cap();
        let mut records = self.lock();
        records.clear();
        for (user_id, mut record) in loaded {
            trim_front(&mut record.history, cap);
            records.insert(user_id, record);
        }
        Ok(records.len())
    }

    pub fn append(&self, user_id: &str, role: Role, content: impl Into<String>) {
        let cap = self.history_cap();
        self.with_record(user_id, |record| {
            record.history.push(ChatMessage::new(role, content));
            record.last_message_time = Some(Utc::now());
            trim_front(&mut record.history, cap);
        });
    }

    /// Appends a user message and its reply together.
    pub fn append_exchange(&self, user_id: &str, user_text: &str, reply: &str) {
        let cap = self.history_cap();
        self.with_record(user_id, |record| {
            record.history.push(ChatMessage::user(user_text));
            record.history.push(ChatMessage::assistant(reply));
            record.last_message_time = Some(Utc::now());
            trim_front(&mut record.history, cap);
        });
    }

    pub fn history(&self, user_id: &str) -> Vec<ChatMessage> {
        self.lock().get(user_id).map(|record| record.history.clone()).unwrap_or_default()
    }

    pub fn record(&self, user_id: &str) -> Option<UserRecord> {
        self.lock().get(user_id).cloned()
    }

    pub fn reset(&self, user_id: &str) {
        self.with_record(user_id, |record| record.history.clear());
    }

    pub fn record_emotion(&self, user_id: &str, sample: EmotionSample) {
        self.with_record(user_id, |record| {
            record.emotion = Some(sample.emotion);
            record.emotion_history.push(sample);
            trim_front(&mut record.emotion_history, EMOTION_HISTORY_CAP);
        });
    }

    pub fn record_feedback(&self, entry: FeedbackEntry) {
        let user_id = entry.user_id.clone();
        self.with_record(&user_id, |record| record.feedback.push(entry));
    }

    pub fn user_count(&self) -> usize {
        self.lock().len()
    }

    pub fn snapshot(&self) -> UserRecords {
        self.lock().iter().map(|(user_id, record)| (user_id.clone(), record.clone())).collect()
    }

    /// Saves the current cache. Concurrent calls are serialized and each one
    /// snapshots after acquiring the lock, so the last writer holds the
    /// newest state.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.snapshot();
        self.backend.save_all(&snapshot).await
    }

    pub fn persist_async(&self) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            if let Err(error) = store.persist().await {
                tracing::warn!(
                    event_name = "conversation.persist_failed",
                    error = %error,
                    "failed to persist user records"
                );
            }
        })
    }

    fn with_record<T>(&self, user_id: &str, f: impl FnOnce(&mut UserRecord) -> T) -> T {
        let mut records = self.lock();
        f(records.entry(user_id.to_owned()).or_default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, UserRecord>> {
        match self.records.lock() {
            Ok(records) => records,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn trim_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}
