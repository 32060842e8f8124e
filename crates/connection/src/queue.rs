//! Bounded outbound message queue.
//!
//! Producers enqueue without waiting; a full queue drops the message. The
//! single receiver is shared across epochs so that each epoch's write pump
//! drains the same channel, and is cleared whenever a connection ends.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::warn;

use hasslife_protocol::Message;

use crate::error::QueueError;

/// Creates a queue holding at most `capacity` messages (minimum 1).
pub fn outbound_queue(capacity: usize) -> (OutboundQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        OutboundQueue { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer side of the outbound queue.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Message>,
}

impl OutboundQueue {
    /// Enqueues a message for the current connection.
    ///
    /// Never blocks: returns [`QueueError::Full`] when the queue is at
    /// capacity.
    pub fn enqueue(&self, message: Message) -> Result<(), QueueError> {
        let msg_type = message.msg_type;
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%msg_type, "send queue full, dropping message");
                Err(QueueError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer side of the outbound queue.
#[derive(Clone)]
pub struct QueueReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
}

impl QueueReceiver {
    /// Locks the receiver for the duration of one write pump.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, mpsc::Receiver<Message>> {
        self.rx.lock().await
    }

    /// Discards every queued message, returning how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hasslife_protocol::MessageType;

    #[tokio::test]
    async fn overflow_returns_full() {
        let (queue, _rx) = outbound_queue(1000);
        for i in 0..1000 {
            assert!(queue.enqueue(Message::ping()).is_ok(), "enqueue {i}");
        }
        assert_eq!(queue.enqueue(Message::ping()), Err(QueueError::Full));
        assert_eq!(queue.len(), 1000);
    }

    #[tokio::test]
    async fn preserves_fifo_order() {
        let (queue, rx) = outbound_queue(8);
        queue.enqueue(Message::bare(MessageType::Auth)).unwrap();
        queue.enqueue(Message::ping()).unwrap();
        queue.enqueue(Message::bare(MessageType::SyncState)).unwrap();

        let mut guard = rx.lock().await;
        assert_eq!(guard.recv().await.unwrap().msg_type, MessageType::Auth);
        assert_eq!(guard.recv().await.unwrap().msg_type, MessageType::Ping);
        assert_eq!(guard.recv().await.unwrap().msg_type, MessageType::SyncState);
    }

    #[tokio::test]
    async fn clear_discards_pending() {
        let (queue, rx) = outbound_queue(8);
        for _ in 0..5 {
            queue.enqueue(Message::ping()).unwrap();
        }
        assert_eq!(rx.clear().await, 5);
        assert!(queue.is_empty());
        assert_eq!(rx.clear().await, 0);
    }

    #[tokio::test]
    async fn closed_when_receiver_dropped() {
        let (queue, rx) = outbound_queue(4);
        drop(rx);
        assert_eq!(queue.enqueue(Message::ping()), Err(QueueError::Closed));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let (queue, _rx) = outbound_queue(0);
        assert_eq!(queue.capacity(), 1);
    }
}
