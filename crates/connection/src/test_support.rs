//! Helpers shared by unit tests.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Notify;

use hasslife_protocol::messages::ControlRow;
use hasslife_protocol::{Message, read_frame, write_frame};

use crate::config::ServerEndpoint;
use crate::error::InvokeError;
use crate::provider::{InvokeFuture, ServiceInvoker};

/// Records every call; fails the configured services.
#[derive(Default)]
pub(crate) struct RecordingInvoker {
    calls: Mutex<Vec<ControlRow>>,
    failing: HashSet<String>,
    notify: Notify,
}

impl RecordingInvoker {
    pub(crate) fn failing<const N: usize>(services: [&str; N]) -> Self {
        Self {
            failing: services.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<ControlRow> {
        self.calls.lock().unwrap().clone()
    }

    /// Waits until at least `n` calls were recorded or `limit` elapses.
    pub(crate) async fn wait_for_calls(&self, n: usize, limit: Duration) -> Vec<ControlRow> {
        let _ = tokio::time::timeout(limit, async {
            loop {
                let notified = self.notify.notified();
                if self.calls.lock().unwrap().len() >= n {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.calls()
    }
}

impl ServiceInvoker for RecordingInvoker {
    fn invoke(&self, call: ControlRow) -> InvokeFuture<'_> {
        Box::pin(async move {
            let fail = self.failing.contains(&call.service);
            let service = call.service.clone();
            self.calls.lock().unwrap().push(call);
            self.notify.notify_waiters();
            if fail {
                Err(InvokeError::Failed(format!("{service} refused")))
            } else {
                Ok(())
            }
        })
    }
}

/// Binds a listener on an ephemeral local port.
pub(crate) async fn local_listener() -> (TcpListener, ServerEndpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, ServerEndpoint::new("127.0.0.1", port))
}

/// Reads frames until one of the given type arrives.
pub(crate) async fn expect_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    msg_type: hasslife_protocol::MessageType,
) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), read_frame(reader))
            .await
            .expect("timed out waiting for frame")
            .expect("read frame");
        if msg.msg_type == msg_type {
            return msg;
        }
    }
}

pub(crate) async fn send_frame<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) {
    write_frame(writer, msg).await.expect("write frame");
}
