//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the fields it changes. Each type implements [`Default`]
//! with production values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TeamhubSettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Transport-level liveness probing.
    pub heartbeat: HeartbeatSettings,
    /// Dispatcher queues and collaborator deadlines.
    pub hub: HubSettings,
    /// Shared presence table.
    pub presence: PresenceSettings,
    /// Notification bridge.
    pub bridge: BridgeSettings,
    /// Credential verification.
    pub auth: AuthSettings,
    /// `SQLite` database.
    pub database: DatabaseSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl TeamhubSettings {
    /// Reject combinations the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(SettingsError::InvalidValue(
                "auth.jwtSecret must be set (or TEAMHUB_JWT_SECRET)".into(),
            ));
        }
        if self.heartbeat.pong_timeout_secs <= self.heartbeat.ping_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat.pongTimeoutSecs ({}) must exceed pingIntervalSecs ({})",
                self.heartbeat.pong_timeout_secs, self.heartbeat.ping_interval_secs
            )));
        }
        if self.presence.ttl_secs <= self.presence.refresh_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "presence.ttlSecs ({}) must exceed refreshIntervalSecs ({})",
                self.presence.ttl_secs, self.presence.refresh_interval_secs
            )));
        }
        if self.hub.event_queue_capacity == 0 || self.hub.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue("hub queue capacities must be non-zero".into()));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (0 picks an ephemeral port).
    pub port: u16,
    /// Largest accepted inbound frame.
    pub max_message_bytes: usize,
    /// Time allowed for in-flight connections to close on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_message_bytes: 64 * 1024,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Liveness probing settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Interval between ping frames.
    pub ping_interval_secs: u64,
    /// Silence after which a connection is considered dead.
    pub pong_timeout_secs: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval_secs: 25,
            pong_timeout_secs: 60,
        }
    }
}

impl HeartbeatSettings {
    /// Ping interval as a [`Duration`].
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Pong timeout as a [`Duration`].
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

/// Dispatcher settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of each of the three dispatcher input queues.
    pub event_queue_capacity: usize,
    /// Outbound frames buffered per connection before writes are dropped.
    pub outbound_buffer: usize,
    /// Deadline for any single collaborator call.
    pub collaborator_timeout_ms: u64,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            event_queue_capacity: 1024,
            outbound_buffer: 256,
            collaborator_timeout_ms: 5_000,
        }
    }
}

impl HubSettings {
    /// Collaborator deadline as a [`Duration`].
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }
}

/// Where the shared presence table lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceBackend {
    /// Process-local table; only useful for a single instance.
    Memory,
    /// The shared `SQLite` database.
    #[default]
    Sqlite,
}

/// Shared presence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceSettings {
    /// Storage backend.
    pub backend: PresenceBackend,
    /// Rows not refreshed within this window are swept.
    pub ttl_secs: u64,
    /// How often this instance refreshes its rows and sweeps stale ones.
    pub refresh_interval_secs: u64,
    /// Identity of this hub instance; generated at startup when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl Default for PresenceSettings {
    fn default() -> Self {
        Self {
            backend: PresenceBackend::Sqlite,
            ttl_secs: 120,
            refresh_interval_secs: 30,
            instance_id: None,
        }
    }
}

/// Notification bridge settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Whether broadcast pings are pushed at all.
    pub enabled: bool,
    /// Pings buffered per subscribed user before the slowest stream lags.
    pub per_user_buffer: usize,
    /// SSE keep-alive comment interval.
    pub keep_alive_secs: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            per_user_buffer: 32,
            keep_alive_secs: 15,
        }
    }
}

/// Credential verification settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret for HS256 tokens.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jwt_secret: String,
    /// Cookie consulted when no query or header credential is present.
    pub cookie_name: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            cookie_name: "jwt".to_string(),
        }
    }
}

/// Database settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Database file (relative paths resolve under `~/.teamhub`).
    pub path: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "teamhub.db".to_string(),
            pool_size: 8,
        }
    }
}

impl DatabaseSettings {
    /// Resolve [`Self::path`] against `home` when it is relative.
    pub fn resolved_path(&self, home: &Path) -> PathBuf {
        let path = Path::new(&self.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            home.join(path)
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
