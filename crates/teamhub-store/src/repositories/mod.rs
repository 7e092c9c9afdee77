//! Repository implementations for `SQLite` database operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`,
//! so every operation is a plain function of (connection, input).

pub mod membership;
pub mod message;
pub mod presence;

pub use membership::MembershipRepo;
pub use message::MessageRepo;
pub use presence::PresenceRepo;
