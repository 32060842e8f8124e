//! Per-client shared state: login triple, tracked entities, liveness.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use sha1::{Digest, Sha1};
use tokio::time::Instant;

use hasslife_protocol::messages::LoginPayload;

/// Login triple sent in `Auth` and attached to sync pushes.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginInfo {
    pub username: String,
    /// Lowercase SHA-1 hex of the plaintext password.
    pub password_digest: String,
    pub client_version: String,
}

impl LoginInfo {
    pub fn new(username: impl Into<String>, password: &str, client_version: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_digest: password_digest(password),
            client_version: client_version.into(),
        }
    }

    pub fn payload(&self) -> LoginPayload {
        LoginPayload {
            username: self.username.clone(),
            password: self.password_digest.clone(),
            version: self.client_version.clone(),
        }
    }
}

impl std::fmt::Debug for LoginInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginInfo")
            .field("username", &self.username)
            .field("client_version", &self.client_version)
            .finish_non_exhaustive()
    }
}

/// SHA-1 hex digest of a password.
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha1::digest(password.as_bytes()))
}

/// State shared by the dispatcher, the pumps and the sync manager.
///
/// The tracked set is swapped as a whole, so readers always see either the
/// previous or the new list.
#[derive(Debug)]
pub struct Session {
    login: LoginInfo,
    tracked: RwLock<Arc<HashSet<String>>>,
    last_activity: Mutex<Instant>,
    last_pong: Mutex<Option<Instant>>,
    terminal_reason: Mutex<Option<String>>,
}

impl Session {
    pub fn new(login: LoginInfo) -> Self {
        Self {
            login,
            tracked: RwLock::new(Arc::new(HashSet::new())),
            last_activity: Mutex::new(Instant::now()),
            last_pong: Mutex::new(None),
            terminal_reason: Mutex::new(None),
        }
    }

    pub fn login(&self) -> &LoginInfo {
        &self.login
    }

    /// Records inbound traffic.
    pub fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }

    pub fn mark_pong(&self) {
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    pub fn last_pong(&self) -> Option<Instant> {
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the tracked entity set wholesale.
    pub fn replace_tracked(&self, ids: impl IntoIterator<Item = String>) -> usize {
        let set: HashSet<String> = ids.into_iter().collect();
        let len = set.len();
        *self.tracked.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(set);
        len
    }

    pub fn is_tracked(&self, entity_id: &str) -> bool {
        self.tracked_snapshot().contains(entity_id)
    }

    /// Current tracked set. Cheap: clones the `Arc`.
    pub fn tracked_snapshot(&self) -> Arc<HashSet<String>> {
        Arc::clone(&self.tracked.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Sorted copy of the tracked ids.
    pub fn tracked_entities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tracked_snapshot().iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Records the peer's terminal error. The first reason wins.
    pub fn mark_terminal(&self, reason: impl Into<String>) {
        let mut guard = self.terminal_reason.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(reason.into());
        }
    }

    pub fn terminal_reason(&self) -> Option<String> {
        self.terminal_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
