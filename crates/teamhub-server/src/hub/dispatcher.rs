//! The dispatcher task: sole owner of the registry and sole consumer of the
//! connect, message and disconnect queues.

use std::sync::Arc;

use metrics::{counter, gauge};
use teamhub_core::envelope::MessageKind;
use teamhub_core::errors::HubError;
use teamhub_core::services::Identity;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::Registry;
use super::routing::{Router, bounded};
use super::{Disconnect, HubConfig, HubHandle, HubServices, Inbound};
use crate::metrics as m;
use crate::websocket::connection::{CLOSE_GOING_AWAY, CLOSE_SUPERSEDED, Connection};

/// Single-owner routing state machine.
pub struct Dispatcher {
    registry: Registry,
    router: Router,
    config: HubConfig,
    connect_rx: mpsc::Receiver<Arc<Connection>>,
    message_rx: mpsc::Receiver<Inbound>,
    disconnect_rx: mpsc::Receiver<Disconnect>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Build the dispatcher and the handle that feeds it.
    ///
    /// Nothing is processed until [`run`](Self::run) is spawned.
    pub fn new(services: HubServices, config: HubConfig, cancel: CancellationToken) -> (Self, HubHandle) {
        let capacity = config.queue_capacity.max(1);
        let (connect_tx, connect_rx) = mpsc::channel(capacity);
        let (message_tx, message_rx) = mpsc::channel(capacity);
        let (disconnect_tx, disconnect_rx) = mpsc::channel(capacity);
        let (registry, view) = Registry::new();
        let router = Router::new(services, config.collaborator_timeout, config.bridge_enabled);

        let handle = HubHandle {
            connect_tx,
            message_tx,
            disconnect_tx,
            view,
        };
        let dispatcher = Self {
            registry,
            router,
            config,
            connect_rx,
            message_rx,
            disconnect_rx,
            cancel,
        };
        (dispatcher, handle)
    }

    /// Process events one at a time until cancelled, then close every
    /// registered connection.
    pub async fn run(mut self) {
        let period = self.config.presence_refresh_interval;
        let mut reconcile = time::interval_at(time::Instant::now() + period, period);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("dispatcher started");

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(conn) = self.connect_rx.recv() => self.on_connect(conn).await,
                Some(event) = self.disconnect_rx.recv() => self.on_disconnect(event).await,
                Some(inbound) = self.message_rx.recv() => self.on_message(inbound).await,
                _ = reconcile.tick() => self.reconcile_presence().await,
            }
        }

        self.shutdown().await;
    }

    async fn on_connect(&mut self, conn: Arc<Connection>) {
        let identity = Identity {
            user_id: conn.user_id.clone(),
            display_name: conn.display_name.clone(),
        };
        debug!(user_id = %identity.user_id, connection_id = %conn.id, "registering connection");

        if let Some(previous) = self.registry.upsert(conn) {
            info!(user_id = %identity.user_id, connection_id = %previous.id, "superseded by new connection");
            counter!(m::SUPERSEDED_TOTAL).increment(1);
            previous.close(CLOSE_SUPERSEDED, "superseded");
        }
        self.record_size();

        if let Err(e) = bounded(
            self.router.timeout(),
            "set online",
            self.router.services().presence.set_online(&identity),
            HubError::Presence,
        )
        .await
        {
            warn!(user_id = %identity.user_id, error = %e, "presence update failed");
        }
    }

    async fn on_disconnect(&mut self, event: Disconnect) {
        let Some(conn) = self.registry.remove(&event.user_id, &event.connection_id) else {
            debug!(user_id = %event.user_id, connection_id = %event.connection_id, "stale disconnect ignored");
            return;
        };
        debug!(user_id = %conn.user_id, connection_id = %conn.id, "connection deregistered");
        self.record_size();

        if let Err(e) = bounded(
            self.router.timeout(),
            "set offline",
            self.router.services().presence.set_offline(&event.user_id),
            HubError::Presence,
        )
        .await
        {
            warn!(user_id = %event.user_id, error = %e, "presence update failed");
        }
    }

    async fn on_message(&mut self, inbound: Inbound) {
        let kind = inbound.envelope.kind.clone();
        let sender = inbound.envelope.sender_id.clone();
        let label = match &kind {
            MessageKind::Unknown(_) => "unknown".to_owned(),
            known => known.as_str().to_owned(),
        };
        counter!(m::MESSAGES_TOTAL, "kind" => label).increment(1);

        match self.router.route(&self.registry, inbound).await {
            Ok(delivered) => debug!(kind = %kind, delivered, "message routed"),
            Err(HubError::UnknownKind(unknown)) => {
                info!(kind = %unknown, sender = ?sender, "unknown message kind, dropped");
                counter!(m::UNKNOWN_KINDS_TOTAL).increment(1);
            }
            Err(e) => {
                warn!(kind = %kind, sender = ?sender, error = %e, "message dropped");
                counter!(m::MESSAGES_FAILED_TOTAL, "reason" => e.label()).increment(1);
            }
        }
    }

    /// Refresh this instance's presence rows and sweep expired ones.
    async fn reconcile_presence(&self) {
        let presence = &self.router.services().presence;
        let users = self.registry.users();
        if !users.is_empty() {
            if let Err(e) = bounded(
                self.router.timeout(),
                "refresh presence",
                presence.refresh(&users),
                HubError::Presence,
            )
            .await
            {
                warn!(error = %e, users = users.len(), "presence refresh failed");
            }
        }

        match bounded(
            self.router.timeout(),
            "sweep presence",
            presence.sweep_expired(self.config.presence_ttl.as_secs()),
            HubError::Presence,
        )
        .await
        {
            Ok(0) => {}
            Ok(swept) => {
                info!(swept, "expired presence rows removed");
                counter!(m::PRESENCE_SWEPT_TOTAL).increment(swept as u64);
            }
            Err(e) => warn!(error = %e, "presence sweep failed"),
        }
    }

    async fn shutdown(&mut self) {
        let drained = self.registry.drain();
        info!(connections = drained.len(), "dispatcher stopping");
        self.record_size();
        for conn in drained {
            conn.close(CLOSE_GOING_AWAY, "server shutting down");
            if let Err(e) = bounded(
                self.router.timeout(),
                "set offline",
                self.router.services().presence.set_offline(&conn.user_id),
                HubError::Presence,
            )
            .await
            {
                warn!(user_id = %conn.user_id, error = %e, "presence update failed");
            }
        }
        if !self.router.drain_pings(self.router.timeout()).await {
            warn!("bridge pings still in flight at shutdown, abandoned");
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_size(&self) {
        gauge!(m::REGISTRY_ENTRIES).set(self.registry.len() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use teamhub_core::envelope::Envelope;
    use teamhub_core::ids::{ChannelId, UserId};
    use tokio::task::JoinHandle;

    use crate::hub::test_support::{Fakes, fakes};
    use crate::websocket::connection::{CLOSE_SUPERSEDED, Outbound, channel};

    fn identity(user: &str) -> Identity {
        Identity {
            user_id: UserId::from(user),
            display_name: user.to_uppercase(),
        }
    }

    fn start(f: &Fakes, config: HubConfig) -> (HubHandle, CancellationToken, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let (dispatcher, handle) = Dispatcher::new(f.services(), config, cancel.clone());
        let task = tokio::spawn(dispatcher.run());
        (handle, cancel, task)
    }

    async fn settle(handle: &HubHandle, expected: usize) {
        let mut watch = handle.watch();
        let _ = tokio::time::timeout(
            Duration::from_secs(2),
            watch.wait_for(|v| v.connections() == expected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn connect_registers_and_marks_online() {
        let f = fakes();
        let (hub, cancel, task) = start(&f, HubConfig::default());
        let (conn, _rx) = channel(&identity("u1"), 8);

        hub.connect(conn).await.unwrap();
        settle(&hub, 1).await;
        assert!(hub.view().contains(&UserId::from("u1")));

        cancel.cancel();
        task.await.unwrap();
        assert!(!f.presence.is_online("u1"));
    }

    #[tokio::test]
    async fn reconnect_supersedes_and_stale_disconnect_is_noop() {
        let f = fakes();
        let (hub, cancel, task) = start(&f, HubConfig::default());
        let (first, _rx1) = channel(&identity("u1"), 8);
        let (second, _rx2) = channel(&identity("u1"), 8);

        hub.connect(first.clone()).await.unwrap();
        hub.connect(second.clone()).await.unwrap();
        hub.disconnect(first.user_id.clone(), first.id.clone()).await.unwrap();
        // a probe message forces the earlier events through the loop
        hub.submit(Envelope::new(MessageKind::System)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(first.close_frame(), Some((CLOSE_SUPERSEDED, "superseded")));
        assert!(!second.is_closed());
        assert_eq!(hub.view().connections(), 1);
        assert!(f.presence.is_online("u1"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn double_disconnect_is_idempotent() {
        let f = fakes();
        let (hub, cancel, task) = start(&f, HubConfig::default());
        let (conn, _rx) = channel(&identity("u1"), 8);

        hub.connect(conn.clone()).await.unwrap();
        settle(&hub, 1).await;
        hub.disconnect(conn.user_id.clone(), conn.id.clone()).await.unwrap();
        hub.disconnect(conn.user_id.clone(), conn.id.clone()).await.unwrap();
        settle(&hub, 0).await;
        assert!(!f.presence.is_online("u1"));

        // still serving
        let (other, _rx2) = channel(&identity("u2"), 8);
        hub.connect(other).await.unwrap();
        settle(&hub, 1).await;

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn bad_message_does_not_stop_the_loop() {
        let f = fakes();
        f.membership.channel("C1", &["u1", "u2"]);
        let (hub, cancel, task) = start(&f, HubConfig::default());
        let (u1, _rx1) = channel(&identity("u1"), 8);
        let (u2, mut rx2) = channel(&identity("u2"), 8);
        hub.connect(u1).await.unwrap();
        hub.connect(u2).await.unwrap();
        settle(&hub, 2).await;

        let mut unknown = Envelope::new(MessageKind::Unknown("typing".into()));
        unknown.attribute_to(&UserId::from("u1"), "U1");
        hub.submit(unknown).await.unwrap();

        let mut chat = Envelope {
            channel_id: Some(ChannelId::from("C1")),
            content: Some("still here".into()),
            ..Envelope::new(MessageKind::Broadcast)
        };
        chat.attribute_to(&UserId::from("u1"), "U1");
        hub.submit(chat).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx2.recv())
            .await
            .unwrap()
            .unwrap();
        let Outbound::Text(text) = frame else {
            panic!("expected text frame, got {frame:?}");
        };
        let env = Envelope::decode(text.as_str()).unwrap();
        assert_eq!(env.content.as_deref(), Some("still here"));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn hung_bridge_does_not_stall_the_loop() {
        let f = fakes();
        let users: Vec<String> = (1..=10).map(|i| format!("u{i}")).collect();
        let names: Vec<&str> = users.iter().map(String::as_str).collect();
        f.membership.channel("C1", &names);
        f.transport.stall();
        let config = HubConfig {
            collaborator_timeout: Duration::from_secs(1),
            ..HubConfig::default()
        };
        let (hub, cancel, task) = start(&f, config);
        let (u1, _rx1) = channel(&identity("u1"), 8);
        let (u3, mut rx3) = channel(&identity("u3"), 8);
        hub.connect(u1).await.unwrap();
        hub.connect(u3).await.unwrap();
        settle(&hub, 2).await;

        let mut chat = Envelope {
            channel_id: Some(ChannelId::from("C1")),
            content: Some("hi".into()),
            ..Envelope::new(MessageKind::Broadcast)
        };
        chat.attribute_to(&UserId::from("u1"), "U1");
        hub.submit(chat).await.unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), rx3.recv())
            .await
            .unwrap()
            .unwrap();

        // nine hung pings must not delay the next event
        let (u2, _rx2) = channel(&identity("u2"), 8);
        hub.connect(u2).await.unwrap();
        let mut watch = hub.watch();
        let _ = tokio::time::timeout(Duration::from_millis(500), watch.wait_for(|v| v.connections() == 3))
            .await
            .unwrap()
            .unwrap();

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn publish_validates_kind_and_recipients() {
        let f = fakes();
        let (hub, cancel, task) = start(&f, HubConfig::default());

        let err = hub.publish(Envelope::new(MessageKind::Broadcast)).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidMessage(_)));
        let err = hub.publish(Envelope::new(MessageKind::Notification)).await.unwrap_err();
        assert!(matches!(err, HubError::InvalidMessage(_)));

        let (conn, mut rx) = channel(&identity("u2"), 8);
        hub.connect(conn).await.unwrap();
        settle(&hub, 1).await;
        let mut env = Envelope {
            content: Some("build green".into()),
            ..Envelope::new(MessageKind::Notification)
        };
        let _ = env.recipients.insert(UserId::from("u2"));
        hub.publish(env).await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(frame, Outbound::Text(_)));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_connections() {
        let f = fakes();
        let (hub, cancel, task) = start(&f, HubConfig::default());
        let (conn, _rx) = channel(&identity("u1"), 8);
        hub.connect(conn.clone()).await.unwrap();
        settle(&hub, 1).await;

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(conn.close_frame(), Some((CLOSE_GOING_AWAY, "server shutting down")));
        assert_eq!(hub.view().connections(), 0);
        assert!(hub.connect(channel(&identity("u3"), 1).0).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn presence_is_refreshed_and_swept_periodically() {
        let f = fakes();
        let config = HubConfig {
            presence_refresh_interval: Duration::from_secs(30),
            ..HubConfig::default()
        };
        let (hub, cancel, task) = start(&f, config);
        let (conn, _rx) = channel(&identity("u1"), 8);
        hub.connect(conn).await.unwrap();

        tokio::time::sleep(Duration::from_secs(65)).await;

        assert_eq!(f.presence.refreshes(), vec![vec![UserId::from("u1")]; 2]);
        assert_eq!(f.presence.sweeps(), 2);

        cancel.cancel();
        task.await.unwrap();
    }
}
