//! Per-epoch worker tasks sharing one socket.
//!
//! Each pump returns when the epoch token is cancelled or when it hits a
//! failure; the first to return ends the epoch.

pub(crate) mod heartbeat;
pub(crate) mod read;
pub(crate) mod write;

pub(crate) use heartbeat::heartbeat_pump;
pub(crate) use read::read_pump;
pub(crate) use write::write_pump;
