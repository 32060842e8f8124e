//! Connection manager: the client's public entry point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use hasslife_protocol::EntityState;

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ClientError;
use crate::provider::{CredentialStore, DeviceStateProvider, ServiceInvoker};
use crate::queue::outbound_queue;
use crate::reconnection::{LoopContext, connection_loop};
use crate::session::{LoginInfo, Session};
use crate::state_sync::{ChangeOutcome, StateSyncManager, SyncStats};
use crate::types::{ClientEvent, ConnectionState};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Host-provided collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn DeviceStateProvider>,
    pub invoker: Arc<dyn ServiceInvoker>,
    pub credentials: Arc<dyn CredentialStore>,
}

/// Owns the cloud connection and the state-sync loop.
///
/// At most one socket is open at any time. Once stopped, either by
/// [`stop`](Self::stop) or by a peer `Error`, the manager cannot be
/// restarted.
pub struct ConnectionManager {
    ctx: LoopContext,
    sync: Arc<StateSyncManager>,
    state_rx: watch::Receiver<ConnectionState>,
    events_rx: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig, collaborators: Collaborators) -> Self {
        let creds = collaborators.credentials.credentials();
        let login = LoginInfo::new(
            creds.username,
            &creds.password,
            collaborators.credentials.client_version(),
        );
        let session = Arc::new(Session::new(login));

        let (queue, queue_rx) = outbound_queue(config.queue_capacity);
        let sync = Arc::new(StateSyncManager::new(
            config.sync.clone(),
            config.whitelist.clone(),
            Arc::clone(&session),
            collaborators.provider,
            queue.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&session),
            Arc::clone(&sync),
            collaborators.invoker,
            queue.clone(),
        ));

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let ctx = LoopContext {
            config,
            session,
            dispatcher,
            queue,
            queue_rx,
            state: Arc::new(state_tx),
            events_tx,
            stop: CancellationToken::new(),
            connect_lock: Arc::new(Mutex::new(())),
        };

        Self {
            ctx,
            sync,
            state_rx,
            events_rx: Mutex::new(Some(events_rx)),
            tasks: std::sync::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Takes the event receiver. Returns `None` on subsequent calls.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Spawns the connection loop and the state-sync loop.
    pub fn start(&self) -> Result<(), ClientError> {
        if self.ctx.stop.is_cancelled() {
            return Err(ClientError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyStarted);
        }

        let sync = Arc::clone(&self.sync);
        let handles = vec![
            tokio::spawn(sync.run(self.ctx.stop.clone())),
            tokio::spawn(connection_loop(self.ctx.clone())),
        ];
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handles);
        info!(addr = %self.ctx.config.server.address(), "connection manager started");
        Ok(())
    }

    /// Stops all tasks and closes the socket. Safe to call more than once.
    pub async fn stop(&self) {
        self.ctx.stop.cancel();
        let handles: Vec<_> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                debug!("task ended abnormally: {e}");
            }
        }
        self.ctx.set_state(ConnectionState::Stopped);
        info!("connection manager stopped");
    }

    /// Resolves once the manager reaches [`ConnectionState::Stopped`].
    pub async fn wait_for_stop(&self) {
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|s| *s == ConnectionState::Stopped).await;
    }

    /// Feeds one entity change to the sync layer. Never blocks.
    pub fn enqueue_state_change(
        &self,
        entity_id: &str,
        old: Option<&EntityState>,
        new: Option<&EntityState>,
    ) -> ChangeOutcome {
        let outcome = self.sync.on_change(entity_id, old, new);
        debug!(entity_id, ?outcome, "state change");
        outcome
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    /// Entity ids the peer asked to be notified about, sorted.
    pub fn tracked_entities(&self) -> Vec<String> {
        self.ctx.session.tracked_entities()
    }

    /// Reason given by the peer if it rejected this client.
    pub fn terminal_reason(&self) -> Option<String> {
        self.ctx.session.terminal_reason()
    }

    /// Messages waiting for the write pump.
    pub fn queue_len(&self) -> usize {
        self.ctx.queue.len()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.ctx.stop.cancel();
    }
}
