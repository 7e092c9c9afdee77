//! In-memory collaborators for dispatcher and routing tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use teamhub_core::envelope::{DeletedMessage, NewMessage, PingNotification, StoredMessage};
use teamhub_core::errors::{ServiceError, ServiceResult};
use teamhub_core::ids::{ChannelId, MessageId, UserId, WorkspaceId};
use teamhub_core::services::{
    Identity, MembershipDirectory, MessageStore, NotificationTransport, PresenceEntry, PresenceStore,
};

use super::HubServices;
use crate::bridge::NotificationBridge;

#[derive(Default)]
pub(crate) struct FakeStore {
    records: Mutex<HashMap<MessageId, StoredMessage>>,
    saved: Mutex<Vec<StoredMessage>>,
    deletes: Mutex<Vec<(MessageId, UserId)>>,
    fail: AtomicBool,
}

impl FakeStore {
    pub(crate) fn fail_saves(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn insert(&self, message: StoredMessage) {
        let _ = self.records.lock().insert(message.id.clone(), message);
    }

    pub(crate) fn get(&self, id: &MessageId) -> Option<StoredMessage> {
        self.records.lock().get(id).cloned()
    }

    pub(crate) fn saved(&self) -> Vec<StoredMessage> {
        self.saved.lock().clone()
    }

    pub(crate) fn deletes(&self) -> Vec<(MessageId, UserId)> {
        self.deletes.lock().clone()
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn save_message(&self, message: &NewMessage) -> ServiceResult<StoredMessage> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("disk full".into()));
        }
        let stored = StoredMessage::from_new(MessageId::generate(), message.clone(), chrono::Utc::now());
        self.insert(stored.clone());
        self.saved.lock().push(stored.clone());
        Ok(stored)
    }

    async fn delete_message(&self, id: &MessageId, actor: &UserId) -> ServiceResult<DeletedMessage> {
        let mut records = self.records.lock();
        match records.get(id) {
            Some(record) if &record.sender_id == actor => {
                let channel_id = record.channel_id.clone();
                let _ = records.remove(id);
                self.deletes.lock().push((id.clone(), actor.clone()));
                Ok(DeletedMessage {
                    id: id.clone(),
                    channel_id,
                })
            }
            _ => Err(ServiceError::NotFound(format!("message {id}"))),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeMembership {
    channels: Mutex<HashMap<ChannelId, BTreeSet<UserId>>>,
    workspaces: Mutex<HashMap<WorkspaceId, BTreeSet<UserId>>>,
    stalled: AtomicBool,
}

fn set_of(users: &[&str]) -> BTreeSet<UserId> {
    users.iter().map(|u| UserId::from(*u)).collect()
}

impl FakeMembership {
    pub(crate) fn channel(&self, id: &str, users: &[&str]) {
        let _ = self.channels.lock().insert(ChannelId::from(id), set_of(users));
    }

    pub(crate) fn workspace(&self, id: &str, users: &[&str]) {
        let _ = self.workspaces.lock().insert(WorkspaceId::from(id), set_of(users));
    }

    /// Make every lookup hang.
    pub(crate) fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    async fn maybe_stall(&self) {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl MembershipDirectory for FakeMembership {
    async fn channel_members(&self, channel: &ChannelId) -> ServiceResult<BTreeSet<UserId>> {
        self.maybe_stall().await;
        Ok(self.channels.lock().get(channel).cloned().unwrap_or_default())
    }

    async fn workspace_members(&self, workspace: &WorkspaceId) -> ServiceResult<BTreeSet<UserId>> {
        self.maybe_stall().await;
        Ok(self.workspaces.lock().get(workspace).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct FakePresence {
    online: Mutex<BTreeMap<UserId, String>>,
    refreshes: Mutex<Vec<Vec<UserId>>>,
    sweeps: AtomicUsize,
}

impl FakePresence {
    pub(crate) fn is_online(&self, user: &str) -> bool {
        self.online.lock().contains_key(&UserId::from(user))
    }

    pub(crate) fn refreshes(&self) -> Vec<Vec<UserId>> {
        self.refreshes.lock().clone()
    }

    pub(crate) fn sweeps(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceStore for FakePresence {
    async fn set_online(&self, identity: &Identity) -> ServiceResult<()> {
        let _ = self
            .online
            .lock()
            .insert(identity.user_id.clone(), identity.display_name.clone());
        Ok(())
    }

    async fn set_offline(&self, user: &UserId) -> ServiceResult<()> {
        let _ = self.online.lock().remove(user);
        Ok(())
    }

    async fn refresh(&self, users: &[UserId]) -> ServiceResult<()> {
        let mut users = users.to_vec();
        users.sort();
        self.refreshes.lock().push(users);
        Ok(())
    }

    async fn sweep_expired(&self, _ttl_secs: u64) -> ServiceResult<usize> {
        let _ = self.sweeps.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }

    async fn online(&self, _ttl_secs: u64) -> ServiceResult<Vec<PresenceEntry>> {
        Ok(self
            .online
            .lock()
            .iter()
            .map(|(user_id, display_name)| PresenceEntry {
                user_id: user_id.clone(),
                display_name: display_name.clone(),
                refreshed_at: chrono::Utc::now(),
            })
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
    pings: Mutex<Vec<(UserId, PingNotification)>>,
    fail: AtomicBool,
    stalled: AtomicBool,
}

impl RecordingTransport {
    pub(crate) fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Make every ping hang.
    pub(crate) fn stall(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    pub(crate) fn pings(&self) -> Vec<(UserId, PingNotification)> {
        self.pings.lock().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn notify_ping(&self, user: &UserId, ping: &PingNotification) -> ServiceResult<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("push gateway down".into()));
        }
        self.pings.lock().push((user.clone(), ping.clone()));
        Ok(())
    }
}

pub(crate) struct Fakes {
    pub store: Arc<FakeStore>,
    pub membership: Arc<FakeMembership>,
    pub presence: Arc<FakePresence>,
    pub transport: Arc<RecordingTransport>,
}

impl Fakes {
    pub(crate) fn services(&self) -> HubServices {
        HubServices {
            store: self.store.clone(),
            membership: self.membership.clone(),
            presence: self.presence.clone(),
            bridge: Arc::new(NotificationBridge::with_transport(self.transport.clone())),
        }
    }
}

pub(crate) fn fakes() -> Fakes {
    Fakes {
        store: Arc::default(),
        membership: Arc::default(),
        presence: Arc::default(),
        transport: Arc::default(),
    }
}
