//! Write pump: drains the outbound queue onto the socket.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use hasslife_protocol::encode;

use crate::error::ConnectionError;
use crate::queue::QueueReceiver;

/// Shutdown of the write half is best effort and bounded.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Writes queued messages in order, one frame per message.
///
/// A message that cannot be encoded is logged and skipped. A failed or
/// timed-out write ends the epoch; the message is not retried.
pub(crate) async fn write_pump<W>(
    mut writer: W,
    queue: QueueReceiver,
    write_timeout: Duration,
    cancel: CancellationToken,
) -> Result<(), ConnectionError>
where
    W: AsyncWrite + Unpin,
{
    let mut rx = queue.lock().await;

    let result = loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            msg = rx.recv() => match msg {
                Some(m) => m,
                None => break Err(ConnectionError::QueueClosed),
            },
        };

        let frame = match encode(&msg) {
            Ok(f) => f,
            Err(e) => {
                warn!(msg_type = %msg.msg_type, error = %e, "dropping unencodable message");
                continue;
            }
        };

        let write = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            res = tokio::time::timeout(write_timeout, write) => match res {
                Ok(Ok(())) => trace!(msg_type = %msg.msg_type, len = frame.len(), "frame written"),
                Ok(Err(e)) => {
                    warn!(msg_type = %msg.msg_type, error = %e, "write failed");
                    break Err(ConnectionError::Io(e));
                }
                Err(_) => {
                    warn!(msg_type = %msg.msg_type, "write timed out");
                    break Err(ConnectionError::WriteTimeout);
                }
            },
        }
    };

    drop(rx);
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, writer.shutdown()).await.is_err() {
        debug!("write half shutdown timed out");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::outbound_queue;
    use hasslife_protocol::constants::MAX_BODY_LEN;
    use hasslife_protocol::{Message, MessageType, read_frame};
    use serde_json::json;

    #[tokio::test]
    async fn writes_frames_in_order() {
        let (queue, rx) = outbound_queue(8);
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(client, rx, Duration::from_secs(1), cancel.clone()));

        queue.enqueue(Message::bare(MessageType::Auth)).unwrap();
        queue.enqueue(Message::ping()).unwrap();

        assert_eq!(read_frame(&mut server).await.unwrap().msg_type, MessageType::Auth);
        assert_eq!(read_frame(&mut server).await.unwrap().msg_type, MessageType::Ping);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn oversized_message_is_skipped() {
        let (queue, rx) = outbound_queue(8);
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(client, rx, Duration::from_secs(1), cancel.clone()));

        let huge = Message::new(MessageType::SyncState, &json!({"blob": "x".repeat(MAX_BODY_LEN)})).unwrap();
        queue.enqueue(huge).unwrap();
        queue.enqueue(Message::ping()).unwrap();

        assert_eq!(read_frame(&mut server).await.unwrap().msg_type, MessageType::Ping);
        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        let (queue, rx) = outbound_queue(8);
        // Tiny buffer, nobody reading: the second write blocks.
        let (client, _server) = tokio::io::duplex(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(client, rx, Duration::from_secs(3), cancel));

        queue.enqueue(Message::ping()).unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectionError::WriteTimeout), "{err}");
    }

    #[tokio::test]
    async fn closed_peer_is_an_io_error() {
        let (queue, rx) = outbound_queue(8);
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(write_pump(client, rx, Duration::from_secs(1), cancel));

        queue.enqueue(Message::ping()).unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectionError::Io(_)), "{err}");
    }
}
