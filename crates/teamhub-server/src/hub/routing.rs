//! Routing policy per message kind.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use futures::future::join_all;
use metrics::counter;
use teamhub_core::envelope::{Envelope, MessageKind, NewMessage, PingNotification};
use teamhub_core::errors::{HubError, ServiceError, ServiceResult};
use teamhub_core::ids::{ChannelId, UserId};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::registry::Registry;
use super::{HubServices, Inbound, Origin};
use crate::bridge::NotificationBridge;
use crate::metrics as m;

/// Run a collaborator call under `timeout`, mapping its failure with `wrap`.
pub(super) async fn bounded<T>(
    timeout: Duration,
    operation: &'static str,
    call: impl Future<Output = ServiceResult<T>>,
    wrap: fn(ServiceError) -> HubError,
) -> Result<T, HubError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(wrap),
        Err(_) => Err(HubError::Timeout { operation }),
    }
}

/// Queue `frame` on the live connection of every recipient except `exclude`.
///
/// Unreachable recipients are logged and skipped. Returns the number of
/// frames queued.
pub(super) fn deliver<'a>(
    registry: &Registry,
    recipients: impl IntoIterator<Item = &'a UserId>,
    exclude: Option<&UserId>,
    frame: &Utf8Bytes,
) -> usize {
    let mut delivered = 0;
    for user in recipients {
        if Some(user) == exclude {
            continue;
        }
        let Some(conn) = registry.get(user) else {
            continue;
        };
        match conn.send(frame.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => {
                warn!(user_id = %user, error = %e, "recipient skipped");
                counter!(m::DELIVERY_DROPS_TOTAL).increment(1);
            }
        }
    }
    counter!(m::DELIVERIES_TOTAL).increment(delivered as u64);
    delivered
}

/// Applies the routing policy. Holds no state of its own.
pub(super) struct Router {
    services: HubServices,
    timeout: Duration,
    bridge_enabled: bool,
    pings: TaskTracker,
}

impl Router {
    pub(super) fn new(services: HubServices, timeout: Duration, bridge_enabled: bool) -> Self {
        Self {
            services,
            timeout,
            bridge_enabled,
            pings: TaskTracker::new(),
        }
    }

    pub(super) fn services(&self) -> &HubServices {
        &self.services
    }

    pub(super) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait up to `limit` for bridge pings still in flight.
    /// Returns `false` if some were still pending.
    pub(super) async fn drain_pings(&self, limit: Duration) -> bool {
        let _ = self.pings.close();
        tokio::time::timeout(limit, self.pings.wait()).await.is_ok()
    }

    /// Route one envelope. Returns the number of frames queued.
    pub(super) async fn route(&self, registry: &Registry, inbound: Inbound) -> Result<usize, HubError> {
        let Inbound { envelope, origin } = inbound;
        match &envelope.kind {
            MessageKind::Broadcast => self.broadcast(registry, envelope).await,
            MessageKind::Delete => self.delete(registry, envelope).await,
            MessageKind::Private | MessageKind::Notification => self.direct(registry, envelope, origin).await,
            MessageKind::Board => self.board(registry, envelope).await,
            MessageKind::System => {
                info!(
                    sender = ?envelope.sender_id,
                    content = envelope.content.as_deref().unwrap_or_default(),
                    "system message"
                );
                Ok(0)
            }
            MessageKind::Ping | MessageKind::Pong => {
                debug!(kind = %envelope.kind, "keepalive reached dispatcher, ignored");
                Ok(0)
            }
            MessageKind::Unknown(kind) => Err(HubError::UnknownKind(kind.clone())),
        }
    }

    /// Persist, then fan out to live channel members, then ping members
    /// through the bridge off the dispatcher loop.
    async fn broadcast(&self, registry: &Registry, envelope: Envelope) -> Result<usize, HubError> {
        let message = NewMessage::from_envelope(&envelope)?;
        let sender = message.sender_id.clone();
        let members = self.channel_members(&message.channel_id).await?;
        require_member(&members, &sender, || format!("channel {}", message.channel_id))?;

        let stored = bounded(
            self.timeout,
            "save message",
            self.services.store.save_message(&message),
            HubError::Persistence,
        )
        .await?;
        debug!(message_id = %stored.id, channel_id = %stored.channel_id, "message persisted");

        let outbound = Envelope::from_stored(&stored, envelope.client_id, envelope.sender_name.clone());
        let frame = Utf8Bytes::from(outbound.to_json()?);
        let delivered = deliver(registry, &members, Some(&sender), &frame);

        if self.bridge_enabled {
            let ping = PingNotification::for_message(&stored, envelope.sender_name.as_deref().unwrap_or_default());
            let targets: Vec<UserId> = members.into_iter().filter(|m| *m != sender).collect();
            let _ = self
                .pings
                .spawn(ping_members(self.services.bridge.clone(), targets, ping, self.timeout));
        }
        Ok(delivered)
    }

    /// Delete the durable record owned by the sender, then notify the live
    /// members of its channel.
    async fn delete(&self, registry: &Registry, envelope: Envelope) -> Result<usize, HubError> {
        let id = envelope
            .id
            .ok_or_else(|| HubError::InvalidMessage("delete without id".into()))?;
        let actor = envelope
            .sender_id
            .ok_or_else(|| HubError::InvalidMessage("delete without sender".into()))?;

        let deleted = bounded(
            self.timeout,
            "delete message",
            self.services.store.delete_message(&id, &actor),
            HubError::Persistence,
        )
        .await?;
        debug!(message_id = %deleted.id, channel_id = %deleted.channel_id, "message deleted");

        let members = self.channel_members(&deleted.channel_id).await?;
        let frame = Utf8Bytes::from(Envelope::deletion_notice(deleted.id, deleted.channel_id).to_json()?);
        Ok(deliver(registry, &members, None, &frame))
    }

    /// `private` and `notification`: an explicit recipient set.
    ///
    /// Server-built envelopes carry their recipients. Client frames name a
    /// channel, whose members (other than the sender) become the recipients.
    async fn direct(&self, registry: &Registry, envelope: Envelope, origin: Origin) -> Result<usize, HubError> {
        let recipients = match origin {
            Origin::Server => envelope.recipients.clone(),
            Origin::Wire => {
                let channel = envelope.channel_id.as_ref().ok_or_else(|| {
                    HubError::InvalidMessage(format!("{} without channelID", envelope.kind))
                })?;
                let sender = envelope
                    .sender_id
                    .as_ref()
                    .ok_or_else(|| HubError::InvalidMessage(format!("{} without sender", envelope.kind)))?;
                let mut members = self.channel_members(channel).await?;
                require_member(&members, sender, || format!("channel {channel}"))?;
                let _ = members.remove(sender);
                members
            }
        };
        let frame = Utf8Bytes::from(envelope.to_json()?);
        Ok(deliver(registry, &recipients, None, &frame))
    }

    /// Live fan-out to workspace members. Not persisted.
    async fn board(&self, registry: &Registry, envelope: Envelope) -> Result<usize, HubError> {
        let workspace = envelope
            .workspace_id
            .as_ref()
            .ok_or_else(|| HubError::InvalidMessage("board without workspaceID".into()))?;
        let sender = envelope
            .sender_id
            .as_ref()
            .ok_or_else(|| HubError::InvalidMessage("board without sender".into()))?;
        let members = bounded(
            self.timeout,
            "resolve workspace members",
            self.services.membership.workspace_members(workspace),
            HubError::Membership,
        )
        .await?;
        require_member(&members, sender, || format!("workspace {workspace}"))?;

        let frame = Utf8Bytes::from(envelope.to_json()?);
        Ok(deliver(registry, &members, Some(sender), &frame))
    }

    async fn channel_members(&self, channel: &ChannelId) -> Result<BTreeSet<UserId>, HubError> {
        bounded(
            self.timeout,
            "resolve channel members",
            self.services.membership.channel_members(channel),
            HubError::Membership,
        )
        .await
    }
}

/// Push `ping` to every target concurrently. Each call is bounded by
/// `timeout`, so a batch never outlives one timeout.
async fn ping_members(bridge: Arc<NotificationBridge>, targets: Vec<UserId>, ping: PingNotification, timeout: Duration) {
    let calls = targets.iter().map(|user| {
        let bridge = &bridge;
        let ping = &ping;
        async move {
            if let Err(e) = bounded(timeout, "notify ping", bridge.notify_ping(user, ping), HubError::Bridge).await {
                warn!(user_id = %user, error = %e, "bridge ping failed");
                counter!(m::BRIDGE_FAILURES_TOTAL).increment(1);
            }
        }
    });
    let _ = join_all(calls).await;
}

fn require_member(members: &BTreeSet<UserId>, user: &UserId, scope: impl FnOnce() -> String) -> Result<(), HubError> {
    if members.contains(user) {
        Ok(())
    } else {
        Err(HubError::NotAMember {
            user: user.clone(),
            scope: scope(),
        })
    }
}
