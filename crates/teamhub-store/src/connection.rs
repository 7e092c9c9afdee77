//! `SQLite` connection pool with WAL mode.
//!
//! Uses `r2d2` connection pooling with the `r2d2_sqlite` backend.
//! [`PragmaCustomizer`] runs on each new connection so every pooled
//! connection has WAL journaling and the configured busy timeout.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::errors::{Result, StoreError};
use crate::migrations;

/// Alias for the connection pool type.
pub type ConnectionPool = Pool<SqliteConnectionManager>;

/// Configuration for the connection pool.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Maximum pool size (default: 8).
    pub pool_size: u32,
    /// Busy timeout in milliseconds (default: 5000).
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug)]
struct PragmaCustomizer {
    busy_timeout_ms: u32,
}

impl r2d2::CustomizeConnection<Connection, rusqlite::Error> for PragmaCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = WAL;\
             PRAGMA busy_timeout = {};\
             PRAGMA synchronous = NORMAL;",
            self.busy_timeout_ms
        ))
    }
}

fn build(manager: SqliteConnectionManager, max_size: u32, busy_timeout_ms: u32) -> Result<ConnectionPool> {
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(PragmaCustomizer { busy_timeout_ms }))
        .build(manager)?;
    Ok(pool)
}

/// Create an in-memory pool with the schema applied (for testing).
///
/// Every in-memory connection is a separate database, so the pool holds
/// exactly one connection.
pub fn new_in_memory() -> Result<ConnectionPool> {
    let pool = build(SqliteConnectionManager::memory(), 1, ConnectionConfig::default().busy_timeout_ms)?;
    let _ = initialize(&pool)?;
    Ok(pool)
}

/// Create a file-backed pool and apply pending migrations.
pub fn open(path: &Path, config: &ConnectionConfig) -> Result<ConnectionPool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Internal(format!("failed to create {}: {e}", parent.display())))?;
    }
    let pool = build(SqliteConnectionManager::file(path), config.pool_size, config.busy_timeout_ms)?;
    let _ = initialize(&pool)?;
    Ok(pool)
}

/// Run pending migrations on a pooled connection. Returns how many were applied.
pub fn initialize(pool: &ConnectionPool) -> Result<u32> {
    let conn = pool.get()?;
    migrations::run_migrations(&conn)
}
