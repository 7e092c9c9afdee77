//! Collaborator interfaces consumed by the hub.
//!
//! The hub owns no durable state. Persistence, membership, presence and
//! out-of-band notification are reached through these traits so that the
//! routing logic can run against `SQLite`, an in-memory table, or a test fake.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::{DeletedMessage, NewMessage, PingNotification, StoredMessage};
use crate::errors::ServiceResult;
use crate::ids::{ChannelId, MessageId, UserId, WorkspaceId};

/// Authenticated identity established at upgrade time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable user identity.
    pub user_id: UserId,
    /// Name shown to other users.
    pub display_name: String,
}

/// Durable message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a channel message and return it with its durable ID.
    async fn save_message(&self, message: &NewMessage) -> ServiceResult<StoredMessage>;

    /// Delete a message authored by `actor`.
    ///
    /// Returns [`ServiceError::NotFound`](crate::errors::ServiceError::NotFound)
    /// when no message with that ID was authored by `actor`.
    async fn delete_message(&self, id: &MessageId, actor: &UserId) -> ServiceResult<DeletedMessage>;
}

/// Channel and workspace membership lookups.
#[async_trait]
pub trait MembershipDirectory: Send + Sync {
    /// Members of a channel.
    async fn channel_members(&self, channel: &ChannelId) -> ServiceResult<BTreeSet<UserId>>;

    /// Members of a workspace.
    async fn workspace_members(&self, workspace: &WorkspaceId) -> ServiceResult<BTreeSet<UserId>>;
}

/// One row of the shared online table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// Online user.
    pub user_id: UserId,
    /// Display name at registration time.
    pub display_name: String,
    /// Last time the owning hub instance refreshed this row.
    pub refreshed_at: DateTime<Utc>,
}

/// Shared presence table, visible to every hub instance.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Mark a user online on this instance.
    async fn set_online(&self, identity: &Identity) -> ServiceResult<()>;

    /// Remove this instance's row for a user.
    async fn set_offline(&self, user: &UserId) -> ServiceResult<()>;

    /// Bump `refreshed_at` for every user this instance holds.
    async fn refresh(&self, users: &[UserId]) -> ServiceResult<()>;

    /// Drop rows (from any instance) not refreshed within `ttl_secs`.
    /// Returns the number of rows removed.
    async fn sweep_expired(&self, ttl_secs: u64) -> ServiceResult<usize>;

    /// Users with at least one row refreshed within `ttl_secs`, one entry
    /// each, carrying their freshest row.
    async fn online(&self, ttl_secs: u64) -> ServiceResult<Vec<PresenceEntry>>;
}

/// Out-of-band push channel for users who may not be looking at the app.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Deliver a ping to one user. Delivery is best-effort.
    async fn notify_ping(&self, user: &UserId, ping: &PingNotification) -> ServiceResult<()>;
}
