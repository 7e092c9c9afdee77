//! # teamhub-store
//!
//! Backends for the collaborators the hub consumes:
//!
//! - [`SqliteMessageStore`]: durable channel messages
//! - [`SqliteMembership`]: channel and workspace membership
//! - [`SqlitePresenceStore`]: the presence table shared by every hub instance
//! - [`MemoryPresenceStore`]: process-local presence
//!
//! The `SQLite` layer is an `r2d2` pool in WAL mode with embedded migrations.
//! Repositories in [`repositories`] are synchronous; [`services`] wraps them
//! in the async collaborator traits.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod memory;
pub mod migrations;
pub mod repositories;
pub mod services;

pub use connection::{ConnectionConfig, ConnectionPool};
pub use errors::{Result, StoreError};
pub use memory::MemoryPresenceStore;
pub use services::{SqliteMembership, SqliteMessageStore, SqlitePresenceStore};
