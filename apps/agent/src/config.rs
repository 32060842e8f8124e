//! Agent configuration management.
//!
//! Configuration is stored as TOML at `$HASSLIFE_CONFIG`, or
//! `~/.config/hasslife/agent.toml` when the variable is unset.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hasslife_connection::{
    ClientConfig, EntityWhitelist, ReconnectConfig, ServerEndpoint, ServerMode, SyncConfig,
};

const CONFIG_ENV: &str = "HASSLIFE_CONFIG";

/// Agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub username: String,

    /// Plaintext password; only its SHA-1 digest goes on the wire.
    #[serde(default)]
    pub password: String,

    /// Version reported to the server.
    #[serde(default = "default_client_version")]
    pub client_version: String,

    /// `release` or `debug`; picks the default endpoint.
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Overrides the endpoint host selected by `mode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Overrides the endpoint port selected by `mode`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    #[serde(default = "default_batch_interval")]
    pub batch_interval_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_full_sync_interval")]
    pub full_sync_interval_secs: u64,

    /// Domains reported to the server. The built-in list when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<Vec<String>>,

    /// JSON file with the initial entity list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices_file: Option<PathBuf>,
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_mode() -> String {
    "release".into()
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_write_timeout() -> u64 {
    3
}

fn default_heartbeat_interval() -> u64 {
    10
}

fn default_heartbeat_timeout() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_debounce() -> u64 {
    100
}

fn default_batch_interval() -> u64 {
    500
}

fn default_batch_size() -> usize {
    50
}

fn default_full_sync_interval() -> u64 {
    180
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            client_version: default_client_version(),
            mode: default_mode(),
            host: None,
            port: None,
            connect_timeout_secs: default_connect_timeout(),
            write_timeout_secs: default_write_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            queue_capacity: default_queue_capacity(),
            debounce_ms: default_debounce(),
            batch_interval_ms: default_batch_interval(),
            batch_size: default_batch_size(),
            full_sync_interval_secs: default_full_sync_interval(),
            whitelist: None,
            devices_file: None,
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    /// Writes the configuration, readable by the owner only on Unix.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Builds the connection settings. Periods that drive a timer must be
    /// non-zero.
    pub fn client_config(&self) -> anyhow::Result<ClientConfig> {
        for (name, value) in [
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("heartbeat_timeout_secs", self.heartbeat_timeout_secs),
            ("batch_interval_ms", self.batch_interval_ms),
            ("batch_size", self.batch_size as u64),
        ] {
            if value == 0 {
                anyhow::bail!("{name} must be greater than zero");
            }
        }

        let mut server: ServerEndpoint = ServerMode::from_name(&self.mode).endpoint();
        if let Some(host) = &self.host {
            server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            server.port = port;
        }

        Ok(ClientConfig {
            server,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            queue_capacity: self.queue_capacity,
            reconnect: ReconnectConfig::default(),
            sync: SyncConfig {
                debounce_window: Duration::from_millis(self.debounce_ms),
                batch_interval: Duration::from_millis(self.batch_interval_ms),
                batch_size: self.batch_size,
                full_sync_interval: Duration::from_secs(self.full_sync_interval_secs),
            },
            whitelist: match &self.whitelist {
                Some(domains) => EntityWhitelist::new(domains.iter().cloned()),
                None => EntityWhitelist::default(),
            },
        })
    }
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("hasslife")
        .join("agent.toml")
}
