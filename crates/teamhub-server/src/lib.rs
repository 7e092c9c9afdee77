//! # teamhub-server
//!
//! The real-time hub.
//!
//! - [`websocket`]: authenticated upgrade, one writer task per connection,
//!   heartbeat liveness, inbound decode loop
//! - [`hub`]: the dispatcher task, sole owner of the connection [`hub::Registry`]
//! - [`bridge`]: lazily initialised notification bridge and its SSE transport
//! - HTTP endpoints: `/ws`, `/notifications`, `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod bridge;
pub mod config;
pub mod health;
pub mod hub;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use hub::{HubConfig, HubHandle, HubServices};
pub use server::{HubServer, RunningServer};
