//! In-memory session cache over a [`SessionStore`].
//!
//! Sessions are loaded lazily on first access and written back only on an
//! explicit [`SessionManager::save`]. The manager does not lock across calls:
//! one mutation in flight per key is the caller's responsibility.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::repair::sanitize_with;
use super::store::{SessionStore, StoreError, validate_key};
use super::truncate::truncate_with;
use super::types::{Message, Role, Session};
use crate::config::{Config, SessionsConfig};
use crate::observability::{Observer, create_observer};

/// When to truncate a history and how much of it to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryBudget {
    /// Length above which the history is truncated.
    pub max_history: usize,
    /// Approximate number of recent messages kept after truncation.
    pub keep_last: usize,
}

impl From<&SessionsConfig> for HistoryBudget {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            max_history: config.max_history,
            keep_last: config.keep_on_truncate,
        }
    }
}

impl Default for HistoryBudget {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

pub struct SessionManager {
    store: SessionStore,
    sessions: Mutex<HashMap<String, Session>>,
    budget: HistoryBudget,
}

impl SessionManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_store(SessionStore::new(dir))
    }

    pub fn with_store(store: SessionStore) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
            budget: HistoryBudget::default(),
        }
    }

    /// Manager over the configured sessions directory, reporting through the
    /// configured observability backend and using the configured budget.
    pub fn from_config(config: &Config) -> Self {
        let store = SessionStore::with_observer(
            config.sessions_dir(),
            create_observer(&config.observability),
        );
        Self::with_store(store).with_budget(HistoryBudget::from(&config.sessions))
    }

    pub fn with_budget(mut self, budget: HistoryBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn budget(&self) -> HistoryBudget {
        self.budget
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    fn observer(&self) -> Arc<dyn Observer> {
        Arc::clone(self.store.observer())
    }

    /// Run `f` against the cached session for `key`, loading it first if needed.
    fn with_session<R>(&self, key: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        if !self.sessions.lock().contains_key(key) {
            let loaded = self.store.load(key).unwrap_or_else(|e| {
                tracing::warn!(key = %key, error = %e, "failed to load session, starting fresh");
                Session::new(key)
            });
            self.sessions
                .lock()
                .entry(key.to_string())
                .or_insert(loaded);
        }

        let mut sessions = self.sessions.lock();
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        f(session)
    }

    /// Snapshot of the session for `key`, created empty if it does not exist.
    pub fn get_or_create(&self, key: &str) -> Session {
        self.with_session(key, |session| session.clone())
    }

    pub fn add_message(&self, key: &str, role: Role, content: impl Into<String>) {
        let message = Message::new(role, content);
        self.add_full_message(key, message);
    }

    pub fn add_full_message(&self, key: &str, message: Message) {
        self.with_session(key, |session| session.push(message));
    }

    pub fn history(&self, key: &str) -> Vec<Message> {
        self.with_session(key, |session| session.messages.clone())
    }

    pub fn set_history(&self, key: &str, messages: Vec<Message>) {
        self.with_session(key, |session| session.replace_messages(messages));
    }

    pub fn summary(&self, key: &str) -> Option<String> {
        self.with_session(key, |session| session.summary.clone())
    }

    pub fn set_summary(&self, key: &str, summary: impl Into<String>) {
        let summary = summary.into();
        self.with_session(key, |session| {
            session.summary = Some(summary);
            session.touch();
        });
    }

    /// History with tool-call pairing repaired, ready to send to a provider.
    /// The stored history is left as is.
    pub fn sanitized_history(&self, key: &str) -> Vec<Message> {
        let observer = self.observer();
        let history = self.history(key);
        sanitize_with(&history, observer.as_ref())
    }

    /// Truncate the history for `key` to about `keep_last` messages without
    /// splitting tool-call groups. Returns the number of messages removed.
    pub fn truncate_history(&self, key: &str, keep_last: usize) -> usize {
        let observer = self.observer();
        self.with_session(key, |session| {
            if session.messages.len() <= keep_last {
                return 0;
            }
            let before = session.messages.len();
            let kept = truncate_with(&session.messages, keep_last, observer.as_ref());
            let removed = before.saturating_sub(kept.len());
            session.replace_messages(kept);
            removed
        })
    }

    /// Truncate only when the history exceeds `max_history`.
    pub fn enforce_budget(&self, key: &str, max_history: usize, keep_last: usize) -> usize {
        let len = self.with_session(key, |session| session.messages.len());
        if len > max_history {
            self.truncate_history(key, keep_last)
        } else {
            0
        }
    }

    /// [`enforce_budget`](Self::enforce_budget) with this manager's budget.
    pub fn apply_budget(&self, key: &str) -> usize {
        let HistoryBudget {
            max_history,
            keep_last,
        } = self.budget;
        self.enforce_budget(key, max_history, keep_last)
    }

    /// Write the cached session for `key` to disk.
    ///
    /// Fails with [`StoreError::InvalidKey`] before touching the filesystem
    /// when the key is unsafe.
    pub fn save(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let snapshot = self.get_or_create(key);
        self.store.save(&snapshot)
    }

    /// Drop `key` from the cache and delete its file.
    pub fn delete(&self, key: &str) -> Result<PathBuf, StoreError> {
        self.sessions.lock().remove(key);
        self.store.delete(key)
    }

    /// Drop every cached session and delete all session files.
    pub fn clear(&self) -> Result<usize, StoreError> {
        self.sessions.lock().clear();
        self.store.clear()
    }
}
