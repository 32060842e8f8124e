//! Collaborator traits implemented by the host.
//!
//! The connection engine never owns device state or executes services
//! itself. The host supplies a [`DeviceStateProvider`], a
//! [`ServiceInvoker`] and a [`CredentialStore`]. [`MemoryStateProvider`] and
//! [`StaticCredentials`] cover simple hosts and tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;

use hasslife_protocol::EntityState;
use hasslife_protocol::messages::ControlRow;

use crate::error::InvokeError;

/// Read access to the host's entity registry.
pub trait DeviceStateProvider: Send + Sync + 'static {
    fn list_all_entities(&self) -> Vec<EntityState>;

    fn get(&self, entity_id: &str) -> Option<EntityState>;
}

/// A boxed future returned by [`ServiceInvoker::invoke`].
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<(), InvokeError>> + Send + 'a>>;

/// Executes a service call on a local device.
///
/// Calls are independent: one failing call does not affect the others.
pub trait ServiceInvoker: Send + Sync + 'static {
    fn invoke(&self, call: ControlRow) -> InvokeFuture<'_>;
}

/// Username and plaintext password.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Source of the login triple.
pub trait CredentialStore: Send + Sync + 'static {
    fn credentials(&self) -> Credentials;

    fn client_version(&self) -> String;
}

/// Credentials fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
    client_version: String,
}

impl StaticCredentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        client_version: impl Into<String>,
    ) -> Self {
        Self {
            credentials: Credentials {
                username: username.into(),
                password: password.into(),
            },
            client_version: client_version.into(),
        }
    }
}

impl CredentialStore for StaticCredentials {
    fn credentials(&self) -> Credentials {
        self.credentials.clone()
    }

    fn client_version(&self) -> String {
        self.client_version.clone()
    }
}

/// One entity transition, as published by [`MemoryStateProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub entity_id: String,
    pub old: Option<EntityState>,
    pub new: Option<EntityState>,
}

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// In-memory entity registry that broadcasts every change.
pub struct MemoryStateProvider {
    entities: RwLock<BTreeMap<String, EntityState>>,
    changes: broadcast::Sender<StateChange>,
}

impl MemoryStateProvider {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entities: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    /// Seeds the registry without publishing changes.
    pub fn with_entities(entities: impl IntoIterator<Item = EntityState>) -> Self {
        let provider = Self::new();
        {
            let mut map = provider.entities.write().unwrap_or_else(PoisonError::into_inner);
            for e in entities {
                map.insert(e.entity_id.clone(), e);
            }
        }
        provider
    }

    /// Inserts or replaces an entity and publishes the transition.
    /// Returns the previous state.
    pub fn upsert(&self, entity: EntityState) -> Option<EntityState> {
        let old = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity.entity_id.clone(), entity.clone());
        self.publish(StateChange {
            entity_id: entity.entity_id.clone(),
            old: old.clone(),
            new: Some(entity),
        });
        old
    }

    /// Removes an entity and publishes the transition.
    pub fn remove(&self, entity_id: &str) -> Option<EntityState> {
        let old = self
            .entities
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_id);
        if old.is_some() {
            self.publish(StateChange {
                entity_id: entity_id.to_string(),
                old: old.clone(),
                new: None,
            });
        }
        old
    }

    /// Subscribes to subsequent changes.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    pub fn len(&self) -> usize {
        self.entities.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, change: StateChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

impl Default for MemoryStateProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateProvider for MemoryStateProvider {
    fn list_all_entities(&self) -> Vec<EntityState> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.entities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
    }
}
