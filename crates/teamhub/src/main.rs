//! # teamhub
//!
//! Hub server binary: loads settings, opens the database, wires the
//! collaborators into the dispatcher and serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use teamhub_core::services::{NotificationTransport, PresenceStore};
use teamhub_settings::{PresenceBackend, TeamhubSettings};
use teamhub_store::{
    ConnectionConfig, ConnectionPool, MemoryPresenceStore, SqliteMembership, SqliteMessageStore,
    SqlitePresenceStore,
};
use teamhub_server::bridge::{NotificationBridge, SseNotifier};
use teamhub_server::{HubServer, HubServices, ServerConfig};

/// teamhub real-time hub.
#[derive(Parser, Debug)]
#[command(name = "teamhub", about = "teamhub real-time hub")]
struct Cli {
    /// Settings file (defaults to `~/.teamhub/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, settings: &mut TeamhubSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.database.path = path.to_string_lossy().into_owned();
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn presence_store(settings: &TeamhubSettings, pool: &ConnectionPool) -> Arc<dyn PresenceStore> {
    match settings.presence.backend {
        PresenceBackend::Memory => Arc::new(MemoryPresenceStore::new()),
        PresenceBackend::Sqlite => {
            let instance_id = settings
                .presence
                .instance_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
            tracing::info!(%instance_id, "shared presence table enabled");
            Arc::new(SqlitePresenceStore::new(pool.clone(), instance_id))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.settings {
        Some(path) => teamhub_settings::load_settings_from_path(path),
        None => teamhub_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    teamhub_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let metrics = teamhub_server::metrics::install_recorder();

    let db_path = settings.database.resolved_path(&teamhub_settings::teamhub_home());
    ensure_parent_dir(&db_path)?;
    let pool = teamhub_store::connection::open(
        &db_path,
        &ConnectionConfig {
            pool_size: settings.database.pool_size,
            ..ConnectionConfig::default()
        },
    )
    .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database ready");

    let config = ServerConfig::from_settings(&settings);
    let notifier = Arc::new(SseNotifier::new(config.bridge_buffer, config.bridge_keep_alive));
    let transport = notifier.clone();
    let bridge = NotificationBridge::lazy(move || {
        tracing::info!("notification bridge initialised");
        transport.clone() as Arc<dyn NotificationTransport>
    });

    let services = HubServices {
        store: Arc::new(SqliteMessageStore::new(pool.clone())),
        membership: Arc::new(SqliteMembership::new(pool.clone())),
        presence: presence_store(&settings, &pool),
        bridge: Arc::new(bridge),
    };

    let server = HubServer::new(config, services, notifier, Some(metrics));
    let running = server.listen().await.context("Failed to bind listener")?;
    tracing::info!(addr = %running.addr(), "teamhub ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    if !running.shutdown().await {
        tracing::warn!("shutdown drain window elapsed, remaining tasks aborted");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
