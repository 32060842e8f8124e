//! Agent runtime: wires the entity registry to the connection manager.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use hasslife_connection::{
    ClientEvent, Collaborators, ConnectionManager, DeviceStateProvider, InvokeError, InvokeFuture,
    MemoryStateProvider, ServiceInvoker, StateChange, StaticCredentials,
};
use hasslife_protocol::EntityState;
use hasslife_protocol::messages::ControlRow;

use crate::config::Config;

/// Runs the agent until Ctrl-C or until the server rejects it.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let devices = match &config.devices_file {
        Some(path) => load_devices(path)?,
        None => Vec::new(),
    };
    tracing::info!(count = devices.len(), "entity registry seeded");

    let registry = Arc::new(MemoryStateProvider::with_entities(devices));
    let manager = Arc::new(ConnectionManager::new(
        config.client_config()?,
        Collaborators {
            provider: registry.clone(),
            invoker: Arc::new(RegistryInvoker::new(Arc::clone(&registry))),
            credentials: Arc::new(StaticCredentials::new(
                config.username.clone(),
                config.password.clone(),
                config.client_version.clone(),
            )),
        },
    ));

    let cancel = CancellationToken::new();

    // -- Registry changes -> pending sync --
    let changes = registry.subscribe();
    let forward = tokio::spawn(forward_changes(changes, Arc::clone(&manager), cancel.clone()));

    // -- Client events --
    let mut events = manager.take_events().await;
    let log_events = tokio::spawn(async move {
        let Some(events) = events.as_mut() else {
            return;
        };
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::StateChanged(state) => {
                    tracing::info!(?state, "connection state");
                }
                ClientEvent::Reconnecting {
                    attempt,
                    next_retry_secs,
                } => {
                    tracing::info!(
                        attempt,
                        delay_secs = format_args!("{next_retry_secs:.1}"),
                        "reconnect scheduled"
                    );
                }
                ClientEvent::Terminated { reason } => {
                    tracing::error!(%reason, "server terminated the session");
                }
            }
        }
    });

    manager.start()?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("SIGINT received, shutting down");
        }
        () = manager.wait_for_stop() => {
            tracing::info!("connection manager stopped");
        }
    }

    cancel.cancel();
    manager.stop().await;
    let _ = forward.await;
    log_events.abort();

    if let Some(reason) = manager.terminal_reason() {
        anyhow::bail!("server rejected this client: {reason}");
    }
    Ok(())
}

/// Reads the initial entity list: a JSON array of entity states.
pub fn load_devices(path: &Path) -> anyhow::Result<Vec<EntityState>> {
    let content = std::fs::read_to_string(path)?;
    let devices: Vec<EntityState> = serde_json::from_str(&content)?;
    Ok(devices)
}

async fn forward_changes(
    mut changes: broadcast::Receiver<StateChange>,
    manager: Arc<ConnectionManager>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Ok(c) => {
                    manager.enqueue_state_change(&c.entity_id, c.old.as_ref(), c.new.as_ref());
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "state change subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Executes device commands against the in-memory registry.
///
/// Supports the on/off, lock and cover services; the new state is written
/// back to the registry, which in turn publishes the change.
pub struct RegistryInvoker {
    registry: Arc<MemoryStateProvider>,
}

impl RegistryInvoker {
    pub fn new(registry: Arc<MemoryStateProvider>) -> Self {
        Self { registry }
    }

    fn apply(&self, call: &ControlRow) -> Result<(), InvokeError> {
        let ids = target_ids(call)?;
        for entity_id in ids {
            let Some(mut entity) = self.registry.get(&entity_id) else {
                return Err(InvokeError::Failed(format!("unknown entity {entity_id}")));
            };
            entity.state = next_state(call, &entity.state)?.to_string();
            tracing::debug!(%entity_id, state = %entity.state, service = %call.service, "service applied");
            self.registry.upsert(entity);
        }
        Ok(())
    }
}

impl ServiceInvoker for RegistryInvoker {
    fn invoke(&self, call: ControlRow) -> InvokeFuture<'_> {
        Box::pin(async move { self.apply(&call) })
    }
}

/// `data.entity_id` may be a single id or a list of ids.
fn target_ids(call: &ControlRow) -> Result<Vec<String>, InvokeError> {
    match call.data.get("entity_id") {
        Some(serde_json::Value::String(id)) => Ok(vec![id.clone()]),
        Some(serde_json::Value::Array(ids)) => ids
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| InvokeError::InvalidData("entity_id must be a string".into()))
            })
            .collect(),
        _ => Err(InvokeError::InvalidData("missing entity_id".into())),
    }
}

fn next_state(call: &ControlRow, current: &str) -> Result<&'static str, InvokeError> {
    let state = match call.service.as_str() {
        "turn_on" => "on",
        "turn_off" => "off",
        "toggle" if current == "on" => "off",
        "toggle" => "on",
        "lock" => "locked",
        "unlock" => "unlocked",
        "open_cover" => "open",
        "close_cover" => "closed",
        _ => {
            return Err(InvokeError::NotFound {
                domain: call.domain.clone(),
                service: call.service.clone(),
            });
        }
    };
    Ok(state)
}
