//! Client configuration.
//!
//! A [`ClientConfig`] is built once by the host and handed to
//! [`ConnectionManager::new`](crate::ConnectionManager::new). Defaults match
//! the deployed client.

use std::collections::HashSet;
use std::time::Duration;

use hasslife_protocol::types::domain_of;

use crate::types::ReconnectConfig;

/// Domains admitted for synchronization by default.
pub const DEFAULT_WHITELIST: &[&str] = &[
    "button",
    "light",
    "cover",
    "switch",
    "vacuum",
    "water_heater",
    "humidifier",
    "fan",
    "media_player",
    "script",
    "climate",
    "input_boolean",
    "automation",
    "group",
    "lock",
];

/// Selects which cloud endpoint the client talks to by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerMode {
    #[default]
    Release,
    Debug,
}

impl ServerMode {
    /// Parses a mode name. Anything other than `debug` selects release.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("debug") {
            ServerMode::Debug
        } else {
            ServerMode::Release
        }
    }

    /// Default endpoint for this mode.
    pub fn endpoint(self) -> ServerEndpoint {
        match self {
            ServerMode::Release => ServerEndpoint::new("hass.blear.cn", 4448),
            ServerMode::Debug => ServerEndpoint::new("192.168.199.9", 4443),
        }
    }
}

/// Host and port of the cloud endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerEndpoint {
    fn default() -> Self {
        ServerMode::default().endpoint()
    }
}

/// Set of entity domains that may be reported to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWhitelist {
    domains: HashSet<String>,
}

impl EntityWhitelist {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains_domain(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    /// Checks the domain prefix of an entity id.
    pub fn admits(&self, entity_id: &str) -> bool {
        self.contains_domain(domain_of(entity_id))
    }
}

impl Default for EntityWhitelist {
    fn default() -> Self {
        Self::new(DEFAULT_WHITELIST.iter().copied())
    }
}

/// Shortest period handed to a ticker. Zero intervals are raised to this.
pub(crate) const MIN_TICK: Duration = Duration::from_millis(10);

/// Debounce, batching and snapshot settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum spacing between accepted changes of one entity.
    pub debounce_window: Duration,
    /// Cadence of the pending-change flush.
    pub batch_interval: Duration,
    /// Entities per flush chunk.
    pub batch_size: usize,
    /// Minimum spacing between unforced full snapshots.
    pub full_sync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(100),
            batch_interval: Duration::from_millis(500),
            batch_size: 50,
            full_sync_interval: Duration::from_secs(180),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: ServerEndpoint,
    /// Timeout of a single TCP connect.
    pub connect_timeout: Duration,
    /// Timeout of a single frame write (including flush).
    pub write_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Inbound silence after which the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Outbound queue capacity in messages.
    pub queue_capacity: usize,
    pub reconnect: ReconnectConfig,
    pub sync: SyncConfig,
    pub whitelist: EntityWhitelist,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerEndpoint::default(),
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(60),
            queue_capacity: 1000,
            reconnect: ReconnectConfig::default(),
            sync: SyncConfig::default(),
            whitelist: EntityWhitelist::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server.address(), "hass.blear.cn:4448");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.sync.debounce_window, Duration::from_millis(100));
        assert_eq!(config.sync.batch_interval, Duration::from_millis(500));
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.full_sync_interval, Duration::from_secs(180));
    }

    #[test]
    fn server_mode_selects_endpoint() {
        assert_eq!(ServerMode::from_name("debug").endpoint().port, 4443);
        assert_eq!(ServerMode::from_name("DEBUG"), ServerMode::Debug);
        assert_eq!(ServerMode::from_name("release"), ServerMode::Release);
        assert_eq!(ServerMode::from_name("anything"), ServerMode::Release);
    }

    #[test]
    fn whitelist_checks_domain_prefix() {
        let wl = EntityWhitelist::default();
        assert!(wl.admits("light.kitchen"));
        assert!(wl.admits("media_player.tv"));
        assert!(!wl.admits("sensor.temperature"));
        assert!(!wl.admits("binary_sensor.door"));
    }

    #[test]
    fn custom_whitelist() {
        let wl = EntityWhitelist::new(["sensor"]);
        assert!(wl.admits("sensor.temperature"));
        assert!(!wl.admits("light.kitchen"));
    }
}
