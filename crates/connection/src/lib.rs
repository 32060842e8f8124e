//! Auto-reconnecting client for the HassLife cloud bridge.
//!
//! [`ConnectionManager`] keeps one TCP connection to the cloud endpoint,
//! answers its requests, mirrors device state changes to it and relays
//! device commands to a host-provided [`ServiceInvoker`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod provider;
pub(crate) mod pumps;
pub mod queue;
pub(crate) mod reconnection;
pub mod session;
pub mod state_sync;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ClientConfig, EntityWhitelist, ServerEndpoint, ServerMode, SyncConfig};
pub use error::{ClientError, ConnectionError, InvokeError, QueueError};
pub use manager::{Collaborators, ConnectionManager};
pub use provider::{
    CredentialStore, Credentials, DeviceStateProvider, InvokeFuture, MemoryStateProvider,
    ServiceInvoker, StateChange, StaticCredentials,
};
pub use state_sync::{ChangeOutcome, SnapshotPage, StateSyncManager, SyncStats};
pub use types::{ClientEvent, ConnectionState, ReconnectConfig};
