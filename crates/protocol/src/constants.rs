use serde::{Deserialize, Serialize};

/// Size of the fixed frame header in bytes.
///
/// Only the first [`LENGTH_PREFIX_LEN`] bytes are meaningful; the rest is
/// reserved and always zero on the wire.
pub const FRAME_HEADER_LEN: usize = 32;

/// Bytes of the header that encode the body length (little-endian `u32`).
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Maximum body size in bytes (1 MiB).
pub const MAX_BODY_LEN: usize = 1024 * 1024;

/// Message type tag carried in the `Type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Liveness
    Ping,
    Pong,

    // Session
    Auth,
    Error,

    // Device registry
    SyncDevice,
    SyncState,
    DeviceControl,
    UpdateEntitys,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

impl MessageType {
    /// Returns the wire tag for this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Ping => "Ping",
            MessageType::Pong => "Pong",
            MessageType::Auth => "Auth",
            MessageType::Error => "Error",
            MessageType::SyncDevice => "SyncDevice",
            MessageType::SyncState => "SyncState",
            MessageType::DeviceControl => "DeviceControl",
            MessageType::UpdateEntitys => "UpdateEntitys",
            MessageType::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_wire_names() {
        for t in [
            MessageType::Ping,
            MessageType::Pong,
            MessageType::Auth,
            MessageType::Error,
            MessageType::SyncDevice,
            MessageType::SyncState,
            MessageType::DeviceControl,
            MessageType::UpdateEntitys,
        ] {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn unknown_tag_is_not_an_error() {
        let t: MessageType = serde_json::from_str("\"FirmwareUpdate\"").unwrap();
        assert_eq!(t, MessageType::Unknown);
    }
}
