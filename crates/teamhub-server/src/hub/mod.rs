//! The hub: a single dispatcher task that owns the registry and routes every
//! event.
//!
//! Sessions and in-process callers talk to it only through [`HubHandle`],
//! which feeds three queues (connect, message, disconnect). The dispatcher
//! handles one event at a time, so registry mutations and routing side
//! effects are totally ordered.

pub mod dispatcher;
pub mod registry;
mod routing;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;
use std::time::Duration;

use teamhub_core::envelope::{Envelope, MessageKind};
use teamhub_core::errors::HubError;
use teamhub_core::ids::{ConnectionId, UserId};
use teamhub_core::services::{MembershipDirectory, MessageStore, PresenceStore};
use tokio::sync::{mpsc, watch};

use crate::bridge::NotificationBridge;
use crate::websocket::connection::Connection;

pub use dispatcher::Dispatcher;
pub use registry::{Registry, RegistryView};

/// Collaborators the dispatcher consumes.
#[derive(Clone)]
pub struct HubServices {
    /// Durable message storage.
    pub store: Arc<dyn MessageStore>,
    /// Channel and workspace membership.
    pub membership: Arc<dyn MembershipDirectory>,
    /// Shared online table.
    pub presence: Arc<dyn PresenceStore>,
    /// Out-of-band ping channel.
    pub bridge: Arc<NotificationBridge>,
}

/// Dispatcher tuning.
#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Capacity of each inbound event queue.
    pub queue_capacity: usize,
    /// Deadline for any single collaborator call.
    pub collaborator_timeout: Duration,
    /// Presence rows older than this are swept.
    pub presence_ttl: Duration,
    /// How often this instance refreshes its presence rows.
    pub presence_refresh_interval: Duration,
    /// Whether broadcasts ping channel members through the bridge.
    pub bridge_enabled: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            collaborator_timeout: Duration::from_secs(5),
            presence_ttl: Duration::from_secs(120),
            presence_refresh_interval: Duration::from_secs(30),
            bridge_enabled: true,
        }
    }
}

/// Where an envelope entered the hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    /// Decoded from a client frame. Carries no recipients.
    Wire,
    /// Built in-process with recipients already resolved.
    Server,
}

#[derive(Debug)]
pub(crate) struct Inbound {
    pub envelope: Envelope,
    pub origin: Origin,
}

#[derive(Debug)]
pub(crate) struct Disconnect {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
}

/// Cloneable sender side of the dispatcher's queues.
#[derive(Clone, Debug)]
pub struct HubHandle {
    connect_tx: mpsc::Sender<Arc<Connection>>,
    message_tx: mpsc::Sender<Inbound>,
    disconnect_tx: mpsc::Sender<Disconnect>,
    view: watch::Receiver<RegistryView>,
}

fn stopped() -> HubError {
    HubError::Internal("hub is not running".into())
}

impl HubHandle {
    /// Register a newly upgraded connection.
    pub async fn connect(&self, connection: Arc<Connection>) -> Result<(), HubError> {
        self.connect_tx.send(connection).await.map_err(|_| stopped())
    }

    /// Forward an envelope decoded from a client frame.
    ///
    /// Any recipients on the envelope are discarded; they are always
    /// resolved server-side.
    pub async fn submit(&self, mut envelope: Envelope) -> Result<(), HubError> {
        envelope.recipients.clear();
        let inbound = Inbound {
            envelope,
            origin: Origin::Wire,
        };
        self.message_tx.send(inbound).await.map_err(|_| stopped())
    }

    /// Deliver a server-built `private` or `notification` envelope to its
    /// pre-resolved recipients.
    pub async fn publish(&self, envelope: Envelope) -> Result<(), HubError> {
        if !matches!(envelope.kind, MessageKind::Private | MessageKind::Notification) {
            return Err(HubError::InvalidMessage(format!(
                "cannot publish {} envelopes",
                envelope.kind
            )));
        }
        if envelope.recipients.is_empty() {
            return Err(HubError::InvalidMessage("published envelope has no recipients".into()));
        }
        let inbound = Inbound {
            envelope,
            origin: Origin::Server,
        };
        self.message_tx.send(inbound).await.map_err(|_| stopped())
    }

    /// Report that a connection ended. Stale or repeated disconnects are
    /// ignored by the dispatcher.
    pub async fn disconnect(&self, user_id: UserId, connection_id: ConnectionId) -> Result<(), HubError> {
        let event = Disconnect { user_id, connection_id };
        self.disconnect_tx.send(event).await.map_err(|_| stopped())
    }

    /// Latest registry snapshot.
    pub fn view(&self) -> RegistryView {
        self.view.borrow().clone()
    }

    /// Subscribe to registry snapshots.
    pub fn watch(&self) -> watch::Receiver<RegistryView> {
        self.view.clone()
    }
}
