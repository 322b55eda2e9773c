use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::SessionConfig;

/// Keyed storage for wake timestamps. Every method is one critical section
/// over a single key.
pub trait SessionStore: Send + Sync {
    fn get(&self, user_id: &str) -> Option<Instant>;
    fn set(&self, user_id: &str, last_wake: Instant);
    fn delete(&self, user_id: &str) -> bool;
    /// Removes the entry only if `predicate` holds for its timestamp at the
    /// moment of removal.
    fn delete_if(&self, user_id: &str, predicate: &dyn Fn(Instant) -> bool) -> bool;
    fn user_ids(&self) -> Vec<String>;
}

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemorySessionStore {
    fn with_sessions<T>(&self, f: impl FnOnce(&mut HashMap<String, Instant>) -> T) -> T {
        match self.sessions.lock() {
            Ok(mut sessions) => f(&mut sessions),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, user_id: &str) -> Option<Instant> {
        self.with_sessions(|sessions| sessions.get(user_id).copied())
    }

    fn set(&self, user_id: &str, last_wake: Instant) {
        self.with_sessions(|sessions| {
            sessions.insert(user_id.to_owned(), last_wake);
        });
    }

    fn delete(&self, user_id: &str) -> bool {
        self.with_sessions(|sessions| sessions.remove(user_id).is_some())
    }

    fn delete_if(&self, user_id: &str, predicate: &dyn Fn(Instant) -> bool) -> bool {
        self.with_sessions(|sessions| match sessions.get(user_id) {
            Some(last_wake) if predicate(*last_wake) => sessions.remove(user_id).is_some(),
            _ => false,
        })
    }

    fn user_ids(&self) -> Vec<String> {
        self.with_sessions(|sessions| sessions.keys().cloned().collect())
    }
}

/// Why a message was or was not admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WakeDecision {
    pub admit: bool,
    pub private: bool,
    pub triggered: bool,
    pub in_window: bool,
    pub random_join: bool,
}

pub struct SessionTracker<S = InMemorySessionStore> {
    store: S,
    wake_timeout: Duration,
    wake_words: Vec<String>,
    random_join_probability: f64,
}

impl SessionTracker<InMemorySessionStore> {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(
            InMemorySessionStore::default(),
            config.wake_timeout(),
            config.wake_words.clone(),
            config.random_join_probability,
        )
    }
}

impl<S> SessionTracker<S>
where
    S: SessionStore,
{
    pub fn new(
        store: S,
        wake_timeout: Duration,
        wake_words: Vec<String>,
        random_join_probability: f64,
    ) -> Self {
        let wake_words = wake_words.into_iter().filter(|word| !word.trim().is_empty()).collect();
        Self { store, wake_timeout, wake_words, random_join_probability }
    }

    pub fn wake_timeout(&self) -> Duration {
        self.wake_timeout
    }

    pub fn contains_wake_word(&self, text: &str) -> bool {
        self.wake_words.iter().any(|word| text.contains(word.as_str()))
    }

    /// Removes the first occurrence of the earliest wake word and trims.
    pub fn strip_wake_word(&self, text: &str) -> String {
        let first = self
            .wake_words
            .iter()
            .filter_map(|word| text.find(word.as_str()).map(|index| (index, word.len())))
            .min_by_key(|(index, _)| *index);

        match first {
            Some((index, len)) => {
                let mut stripped = String::with_capacity(text.len() - len);
                stripped.push_str(&text[..index]);
                stripped.push_str(&text[index + len..]);
                stripped.trim().to_owned()
            }
            None => text.trim().to_owned(),
        }
    }

    pub fn should_admit(
        &self,
        user_id: &str,
        text: &str,
        is_private: bool,
        is_mentioned: bool,
    ) -> bool {
        self.evaluate_at(Instant::now(), user_id, text, is_private, is_mentioned).admit
    }

    pub fn should_admit_at(
        &self,
        now: Instant,
        user_id: &str,
        text: &str,
        is_private: bool,
        is_mentioned: bool,
    ) -> bool {
        self.evaluate_at(now, user_id, text, is_private, is_mentioned).admit
    }

    pub fn evaluate_at(
        &self,
        now: Instant,
        user_id: &str,
        text: &str,
        is_private: bool,
        is_mentioned: bool,
    ) -> WakeDecision {
        if is_private {
            return WakeDecision {
                admit: true,
                private: true,
                triggered: false,
                in_window: false,
                random_join: false,
            };
        }

        let triggered = self.contains_wake_word(text) || is_mentioned;
        let in_window = self
            .store
            .get(user_id)
            .is_some_and(|last_wake| now.saturating_duration_since(last_wake) <= self.wake_timeout);
        let random_join = self.roll_random_join();

        // A random join answers once but does not open a window.
        if triggered || in_window {
            self.store.set(user_id, now);
        }

        WakeDecision {
            admit: triggered || in_window || random_join,
            private: false,
            triggered,
            in_window,
            random_join,
        }
    }

    pub fn is_expired_at(&self, now: Instant, user_id: &str) -> bool {
        self.store
            .get(user_id)
            .map_or(true, |last_wake| now.saturating_duration_since(last_wake) > self.wake_timeout)
    }

    pub fn reap(&self) -> usize {
        self.reap_at(Instant::now())
    }

    /// Evicts expired sessions; returns how many were removed.
    pub fn reap_at(&self, now: Instant) -> usize {
        let timeout = self.wake_timeout;
        self.store
            .user_ids()
            .iter()
            .filter(|user_id| {
                self.store.delete_if(user_id, &|last_wake| {
                    now.saturating_duration_since(last_wake) > timeout
                })
            })
            .count()
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions_at(Instant::now())
    }

    pub fn active_sessions_at(&self, now: Instant) -> usize {
        self.store.user_ids().iter().filter(|user_id| !self.is_expired_at(now, user_id)).count()
    }

    fn roll_random_join(&self) -> bool {
        if self.random_join_probability <= 0.0 {
            return false;
        }
        rand::thread_rng().gen::<f64>() < self.random_join_probability
    }
}
