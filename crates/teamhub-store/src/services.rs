//! Async collaborator implementations over the `SQLite` repositories.
//!
//! `rusqlite` is blocking, so every call checks out a pooled connection on
//! the blocking thread pool via [`tokio::task::spawn_blocking`].

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use teamhub_core::envelope::{DeletedMessage, NewMessage, StoredMessage};
use teamhub_core::errors::{ServiceError, ServiceResult};
use teamhub_core::ids::{ChannelId, MessageId, UserId, WorkspaceId};
use teamhub_core::services::{
    Identity, MembershipDirectory, MessageStore, PresenceEntry, PresenceStore,
};

use crate::connection::ConnectionPool;
use crate::errors::{Result, StoreError};
use crate::repositories::presence::{cutoff_ms, now_ms};
use crate::repositories::{MembershipRepo, MessageRepo, PresenceRepo};

async fn run_blocking<T, F>(pool: &ConnectionPool, f: F) -> ServiceResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T> + Send + 'static,
{
    let pool = pool.clone();
    let joined = tokio::task::spawn_blocking(move || -> Result<T> {
        let conn = pool.get()?;
        f(&conn)
    })
    .await;
    match joined {
        Ok(result) => result.map_err(ServiceError::from),
        Err(e) => Err(ServiceError::Unavailable(format!("store task failed: {e}"))),
    }
}

/// Durable message store backed by the `messages` table.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: ConnectionPool,
}

impl SqliteMessageStore {
    /// Wrap a pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Look up a message by ID.
    pub async fn get(&self, id: &MessageId) -> ServiceResult<Option<StoredMessage>> {
        let id = id.clone();
        run_blocking(&self.pool, move |conn| MessageRepo::get(conn, &id)).await
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn save_message(&self, message: &NewMessage) -> ServiceResult<StoredMessage> {
        let message = message.clone();
        run_blocking(&self.pool, move |conn| {
            MessageRepo::insert(conn, MessageId::generate(), message, Utc::now())
        })
        .await
    }

    async fn delete_message(&self, id: &MessageId, actor: &UserId) -> ServiceResult<DeletedMessage> {
        let (id, actor) = (id.clone(), actor.clone());
        run_blocking(&self.pool, move |conn| {
            match MessageRepo::delete_owned(conn, &id, &actor)? {
                Some(channel_id) => Ok(DeletedMessage { id, channel_id }),
                None => Err(StoreError::NotFound(format!("message {id} authored by {actor}"))),
            }
        })
        .await
    }
}

/// Membership directory backed by the member tables.
#[derive(Clone)]
pub struct SqliteMembership {
    pool: ConnectionPool,
}

impl SqliteMembership {
    /// Wrap a pool.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipDirectory for SqliteMembership {
    async fn channel_members(&self, channel: &ChannelId) -> ServiceResult<BTreeSet<UserId>> {
        let channel = channel.clone();
        run_blocking(&self.pool, move |conn| MembershipRepo::channel_members(conn, &channel)).await
    }

    async fn workspace_members(&self, workspace: &WorkspaceId) -> ServiceResult<BTreeSet<UserId>> {
        let workspace = workspace.clone();
        run_blocking(&self.pool, move |conn| MembershipRepo::workspace_members(conn, &workspace)).await
    }
}

/// Shared presence table; rows written by this process carry `instance_id`.
#[derive(Clone)]
pub struct SqlitePresenceStore {
    pool: ConnectionPool,
    instance_id: String,
}

impl SqlitePresenceStore {
    /// Wrap a pool for the given hub instance.
    pub fn new(pool: ConnectionPool, instance_id: impl Into<String>) -> Self {
        Self {
            pool,
            instance_id: instance_id.into(),
        }
    }

    /// This instance's identity.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }
}

#[async_trait]
impl PresenceStore for SqlitePresenceStore {
    async fn set_online(&self, identity: &Identity) -> ServiceResult<()> {
        let identity = identity.clone();
        let instance = self.instance_id.clone();
        run_blocking(&self.pool, move |conn| {
            PresenceRepo::upsert(conn, &identity.user_id, &instance, &identity.display_name, now_ms())
        })
        .await
    }

    async fn set_offline(&self, user: &UserId) -> ServiceResult<()> {
        let user = user.clone();
        let instance = self.instance_id.clone();
        run_blocking(&self.pool, move |conn| PresenceRepo::remove(conn, &user, &instance).map(|_| ())).await
    }

    async fn refresh(&self, users: &[UserId]) -> ServiceResult<()> {
        if users.is_empty() {
            return Ok(());
        }
        let users = users.to_vec();
        let instance = self.instance_id.clone();
        run_blocking(&self.pool, move |conn| PresenceRepo::touch(conn, &users, &instance, now_ms()).map(|_| ())).await
    }

    async fn sweep_expired(&self, ttl_secs: u64) -> ServiceResult<usize> {
        run_blocking(&self.pool, move |conn| PresenceRepo::sweep(conn, cutoff_ms(ttl_secs))).await
    }

    async fn online(&self, ttl_secs: u64) -> ServiceResult<Vec<PresenceEntry>> {
        run_blocking(&self.pool, move |conn| PresenceRepo::online(conn, cutoff_ms(ttl_secs))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::new_in_memory;
    use assert_matches::assert_matches;

    fn new_message(channel: &str, sender: &str) -> NewMessage {
        NewMessage {
            channel_id: ChannelId::from(channel),
            sender_id: UserId::from(sender),
            content: "hi".into(),
            is_reply: false,
            reply_to_message: None,
            reply_to_user_name: None,
            attachment_title: None,
            attachment_link: None,
        }
    }

    #[tokio::test]
    async fn saved_message_is_retrievable_by_returned_id() {
        let store = SqliteMessageStore::new(new_in_memory().unwrap());
        let stored = store.save_message(&new_message("c1", "u1")).await.unwrap();
        assert!(stored.id.starts_with("msg_"));
        let fetched = store.get(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.channel_id, ChannelId::from("c1"));
        assert_eq!(fetched.sender_id, UserId::from("u1"));
    }

    #[tokio::test]
    async fn delete_by_non_author_is_not_found() {
        let store = SqliteMessageStore::new(new_in_memory().unwrap());
        let stored = store.save_message(&new_message("c1", "u1")).await.unwrap();

        let err = store.delete_message(&stored.id, &UserId::from("u2")).await.unwrap_err();
        assert_matches!(err, ServiceError::NotFound(_));

        let deleted = store.delete_message(&stored.id, &UserId::from("u1")).await.unwrap();
        assert_eq!(deleted.channel_id, ChannelId::from("c1"));
        assert!(store.get(&stored.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn membership_lookup() {
        let pool = new_in_memory().unwrap();
        {
            let conn = pool.get().unwrap();
            let _ = MembershipRepo::add_channel_member(&conn, &ChannelId::from("c1"), &UserId::from("u1")).unwrap();
        }
        let dir = SqliteMembership::new(pool);
        let members = dir.channel_members(&ChannelId::from("c1")).await.unwrap();
        assert!(members.contains(&UserId::from("u1")));
        assert!(dir.workspace_members(&WorkspaceId::from("w")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn presence_lifecycle() {
        let store = SqlitePresenceStore::new(new_in_memory().unwrap(), "node-a");
        let alice = Identity {
            user_id: UserId::from("u1"),
            display_name: "Alice".into(),
        };
        store.set_online(&alice).await.unwrap();
        store.refresh(&[alice.user_id.clone()]).await.unwrap();
        assert_eq!(store.sweep_expired(60).await.unwrap(), 0);
        assert_eq!(store.online(60).await.unwrap()[0].display_name, "Alice");

        store.set_offline(&alice.user_id).await.unwrap();
        store.set_offline(&alice.user_id).await.unwrap();
        assert!(store.online(60).await.unwrap().is_empty());
    }
}
