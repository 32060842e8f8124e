//! Connection loop: connect, run one epoch, back off, repeat.
//!
//! An epoch is the lifetime of one socket. It runs the read, write and
//! heartbeat pumps under a child of the client's stop token; the first pump
//! to return cancels the other two.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dispatcher::Dispatcher;
use crate::error::ConnectionError;
use crate::pumps::{heartbeat_pump, read_pump, write_pump};
use crate::queue::{OutboundQueue, QueueReceiver};
use crate::session::Session;
use crate::types::{ClientEvent, ConnectionState};

/// Shared state handed to the connection loop.
#[derive(Clone)]
pub(crate) struct LoopContext {
    pub(crate) config: ClientConfig,
    pub(crate) session: Arc<Session>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) queue: OutboundQueue,
    pub(crate) queue_rx: QueueReceiver,
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) events_tx: mpsc::Sender<ClientEvent>,
    pub(crate) stop: CancellationToken,
    /// Serializes connect attempts.
    pub(crate) connect_lock: Arc<Mutex<()>>,
}

impl LoopContext {
    /// Publishes a state change. `Stopped` is final.
    pub(crate) fn set_state(&self, next: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next || *current == ConnectionState::Stopped {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(state = ?next, "connection state changed");
            self.emit(ClientEvent::StateChanged(next));
        }
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            debug!("event not delivered: {e}");
        }
    }
}

/// How an epoch ended.
#[derive(Debug)]
pub(crate) enum EpochEnd {
    /// The stop token was cancelled.
    Stopped,
    Failed(ConnectionError),
}

/// Opens the socket, bounded by the connect timeout.
pub(crate) async fn connect(ctx: &LoopContext) -> Result<TcpStream, ConnectionError> {
    let _guard = ctx.connect_lock.lock().await;
    let addr = ctx.config.server.address();
    debug!(%addr, "connecting");

    let stream = tokio::select! {
        biased;
        _ = ctx.stop.cancelled() => return Err(ConnectionError::Cancelled),
        res = tokio::time::timeout(ctx.config.connect_timeout, TcpStream::connect(&addr)) => match res {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ConnectionError::Io(e)),
            Err(_) => return Err(ConnectionError::ConnectTimeout { addr }),
        },
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY");
    }
    Ok(stream)
}

/// Runs the three pumps on `stream` until one of them returns.
pub(crate) async fn run_epoch(ctx: &LoopContext, stream: TcpStream) -> EpochEnd {
    let stale = ctx.queue_rx.clear().await;
    if stale > 0 {
        debug!(dropped = stale, "discarded messages queued while disconnected");
    }
    ctx.session.touch();
    ctx.set_state(ConnectionState::Connected);

    let epoch = ctx.stop.child_token();
    let (reader, writer) = stream.into_split();

    let mut tasks = JoinSet::new();
    tasks.spawn(read_pump(
        reader,
        Arc::clone(&ctx.dispatcher),
        Arc::clone(&ctx.session),
        epoch.clone(),
    ));
    tasks.spawn(write_pump(
        writer,
        ctx.queue_rx.clone(),
        ctx.config.write_timeout,
        epoch.clone(),
    ));
    tasks.spawn(heartbeat_pump(
        ctx.queue.clone(),
        Arc::clone(&ctx.session),
        ctx.config.heartbeat_interval,
        ctx.config.heartbeat_timeout,
        epoch.clone(),
    ));

    let mut cause: Option<ConnectionError> = None;
    let mut first = true;
    while let Some(joined) = tasks.join_next().await {
        if first {
            first = false;
            ctx.set_state(ConnectionState::Closing);
            epoch.cancel();
        }
        let result = joined.unwrap_or_else(|e| Err(ConnectionError::Task(e.to_string())));
        if let Err(e) = result {
            let replace = match &cause {
                None => true,
                Some(current) => e.is_terminal() && !current.is_terminal(),
            };
            if replace {
                cause = Some(e);
            }
        }
    }

    let dropped = ctx.queue_rx.clear().await;
    if dropped > 0 {
        debug!(dropped, "discarded undelivered messages");
    }

    match cause {
        Some(e) if e.is_terminal() => EpochEnd::Failed(e),
        _ if ctx.stop.is_cancelled() => EpochEnd::Stopped,
        Some(e) => EpochEnd::Failed(e),
        None => EpochEnd::Failed(ConnectionError::Cancelled),
    }
}

/// Main loop: one connection at a time, exponential backoff between
/// attempts, until stopped or rejected by the peer.
pub(crate) async fn connection_loop(ctx: LoopContext) {
    let initial = ctx.config.reconnect.initial_delay();
    if !initial.is_zero() {
        debug!(delay_ms = initial.as_millis() as u64, "initial connect jitter");
        tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => {
                ctx.set_state(ConnectionState::Stopped);
                return;
            }
            _ = tokio::time::sleep(initial) => {}
        }
    }

    let mut attempt: u32 = 0;
    loop {
        if ctx.stop.is_cancelled() {
            break;
        }
        ctx.set_state(ConnectionState::Connecting);

        let failure = match connect(&ctx).await {
            Ok(stream) => {
                attempt = 0;
                info!(addr = %ctx.config.server.address(), "connected");
                match run_epoch(&ctx, stream).await {
                    EpochEnd::Stopped => break,
                    EpochEnd::Failed(ConnectionError::PeerError { reason }) => {
                        warn!(%reason, "server rejected client, not reconnecting");
                        ctx.emit(ClientEvent::Terminated { reason });
                        ctx.stop.cancel();
                        break;
                    }
                    EpochEnd::Failed(e) => e,
                }
            }
            Err(ConnectionError::Cancelled) => break,
            Err(e) => e,
        };

        if ctx.stop.is_cancelled() {
            break;
        }
        ctx.set_state(ConnectionState::Disconnected);

        attempt = attempt.saturating_add(1);
        let delay = ctx.config.reconnect.delay_for_attempt(attempt);
        let delay_secs = delay.as_secs_f64();
        warn!(
            error = %failure,
            attempt,
            delay_secs = format_args!("{delay_secs:.1}"),
            "connection attempt failed, retrying"
        );
        ctx.emit(ClientEvent::Reconnecting {
            attempt,
            next_retry_secs: delay_secs,
        });

        tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    ctx.set_state(ConnectionState::Stopped);
    info!("connection loop stopped");
}
