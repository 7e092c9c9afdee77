//! In-process map from user identity to live connection.
//!
//! Owned by the dispatcher task. Nothing else holds the map; other readers
//! see a [`RegistryView`] snapshot published after every mutation.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use teamhub_core::ids::{ConnectionId, UserId};
use tokio::sync::watch;

use crate::websocket::connection::Connection;

/// Immutable snapshot of who is attached to this process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegistryView {
    users: BTreeSet<UserId>,
}

impl RegistryView {
    /// Number of live entries.
    pub fn connections(&self) -> usize {
        self.users.len()
    }

    /// Whether `user` had a live entry when the snapshot was taken.
    pub fn contains(&self, user: &UserId) -> bool {
        self.users.contains(user)
    }

    /// Users with a live entry, sorted.
    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.users.iter()
    }
}

/// At most one connection per user.
pub struct Registry {
    entries: HashMap<UserId, Arc<Connection>>,
    view: watch::Sender<RegistryView>,
}

impl Registry {
    /// Empty registry and the receiver its snapshots are published on.
    pub fn new() -> (Self, watch::Receiver<RegistryView>) {
        let (view, rx) = watch::channel(RegistryView::default());
        (
            Self {
                entries: HashMap::new(),
                view,
            },
            rx,
        )
    }

    /// Install `connection` for its user and return the entry it replaced.
    ///
    /// The caller must close the returned connection.
    pub fn upsert(&mut self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let previous = self.entries.insert(connection.user_id.clone(), connection);
        self.publish();
        previous
    }

    /// Remove `user`'s entry if it is still `connection_id`.
    ///
    /// A disconnect from a connection that was already replaced, or for a
    /// user that is not registered, is a no-op and returns `None`.
    pub fn remove(&mut self, user: &UserId, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        if self.entries.get(user).is_none_or(|c| &c.id != connection_id) {
            return None;
        }
        let removed = self.entries.remove(user);
        self.publish();
        removed
    }

    /// Live connection for `user`.
    pub fn get(&self, user: &UserId) -> Option<&Arc<Connection>> {
        self.entries.get(user)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no user is attached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Users with a live entry.
    pub fn users(&self) -> Vec<UserId> {
        self.entries.keys().cloned().collect()
    }

    /// Remove and return every entry.
    pub fn drain(&mut self) -> Vec<Arc<Connection>> {
        let drained: Vec<_> = self.entries.drain().map(|(_, c)| c).collect();
        self.publish();
        drained
    }

    fn publish(&self) {
        let users = self.entries.keys().cloned().collect();
        let _ = self.view.send_replace(RegistryView { users });
    }
}
