//! Heartbeat pump: periodic pings and inbound-silence detection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use hasslife_protocol::Message;

use crate::config::MIN_TICK;
use crate::error::{ConnectionError, QueueError};
use crate::queue::OutboundQueue;
use crate::session::Session;

/// Enqueues a `Ping` every `interval` and fails once nothing has been
/// received for longer than `timeout`.
pub(crate) async fn heartbeat_pump(
    queue: OutboundQueue,
    session: Arc<Session>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), ConnectionError> {
    let mut ticker = tokio::time::interval(interval.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }

        if let Err(QueueError::Closed) = queue.enqueue(Message::ping()) {
            return Err(ConnectionError::QueueClosed);
        }
        trace!("ping queued");

        let idle = session.idle_for();
        if idle > timeout {
            warn!(idle_secs = format_args!("{:.1}", idle.as_secs_f64()), "heartbeat timeout");
            return Err(ConnectionError::HeartbeatTimeout {
                idle_secs: idle.as_secs_f64(),
            });
        }
    }
}
