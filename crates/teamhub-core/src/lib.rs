//! # teamhub-core
//!
//! Foundation types shared by every teamhub crate.
//!
//! - [`ids`]: branded ID newtypes (user, channel, workspace, message, connection)
//! - [`envelope`]: the routed event envelope and its closed [`MessageKind`](envelope::MessageKind)
//! - [`errors`]: the hub error taxonomy and collaborator failures
//! - [`services`]: traits for the external collaborators the hub consumes
//! - [`logging`]: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod services;
