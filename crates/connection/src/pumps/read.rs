//! Read pump: decodes inbound frames and hands them to the dispatcher.

use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use hasslife_protocol::read_frame;

use crate::dispatcher::{Dispatcher, Disposition};
use crate::error::ConnectionError;
use crate::session::Session;

/// Reads frames until the socket fails, a frame is malformed or the peer
/// sends a terminal `Error`.
///
/// Every decoded frame refreshes the session's liveness timestamp, whatever
/// its type.
pub(crate) async fn read_pump<R>(
    mut reader: R,
    dispatcher: Arc<Dispatcher>,
    session: Arc<Session>,
    cancel: CancellationToken,
) -> Result<(), ConnectionError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            res = read_frame(&mut reader) => match res {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "read failed");
                    return Err(e.into());
                }
            },
        };

        session.touch();
        trace!(msg_type = %msg.msg_type, "received message");

        if let Disposition::Terminate { reason } = dispatcher.dispatch(msg) {
            debug!(%reason, "read pump stopping on peer error");
            return Err(ConnectionError::PeerError { reason });
        }
    }
}
