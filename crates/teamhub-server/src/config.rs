//! Server configuration.

use std::time::Duration;

use teamhub_settings::TeamhubSettings;

use crate::hub::HubConfig;
use crate::websocket::session::SessionConfig;

/// Runtime configuration for [`HubServer`](crate::server::HubServer).
#[derive(Clone)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection liveness and buffering.
    pub session: SessionConfig,
    /// Dispatcher tuning.
    pub hub: HubConfig,
    /// Pings buffered per notification stream.
    pub bridge_buffer: usize,
    /// SSE keep-alive interval.
    pub bridge_keep_alive: Duration,
    /// HS256 secret for session tokens.
    pub jwt_secret: String,
    /// Cookie that may carry the session token.
    pub cookie_name: String,
    /// How long shutdown waits for tasks to drain.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Derive the server configuration from loaded settings.
    pub fn from_settings(settings: &TeamhubSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_message_size: settings.server.max_message_bytes,
            session: SessionConfig {
                ping_interval: settings.heartbeat.ping_interval(),
                pong_timeout: settings.heartbeat.pong_timeout(),
                outbound_buffer: settings.hub.outbound_buffer,
            },
            hub: HubConfig {
                queue_capacity: settings.hub.event_queue_capacity,
                collaborator_timeout: settings.hub.collaborator_timeout(),
                presence_ttl: Duration::from_secs(settings.presence.ttl_secs),
                presence_refresh_interval: Duration::from_secs(settings.presence.refresh_interval_secs),
                bridge_enabled: settings.bridge.enabled,
            },
            bridge_buffer: settings.bridge.per_user_buffer,
            bridge_keep_alive: Duration::from_secs(settings.bridge.keep_alive_secs),
            jwt_secret: settings.auth.jwt_secret.clone(),
            cookie_name: settings.auth.cookie_name.clone(),
            shutdown_timeout: Duration::from_secs(settings.server.shutdown_timeout_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_message_size: 64 * 1024,
            session: SessionConfig::default(),
            hub: HubConfig::default(),
            bridge_buffer: 32,
            bridge_keep_alive: Duration::from_secs(15),
            jwt_secret: String::new(),
            cookie_name: "jwt".into(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("max_message_size", &self.max_message_size)
            .field("session", &self.session)
            .field("hub", &self.hub)
            .field("cookie_name", &self.cookie_name)
            .finish_non_exhaustive()
    }
}
