//! Notification bridge: lightweight pings on a push channel independent of
//! the duplex connections.

pub mod sse;

use std::sync::{Arc, OnceLock};

use teamhub_core::envelope::PingNotification;
use teamhub_core::errors::ServiceResult;
use teamhub_core::ids::UserId;
use teamhub_core::services::NotificationTransport;
use tracing::info;

pub use sse::SseNotifier;

type TransportFactory = Box<dyn Fn() -> Arc<dyn NotificationTransport> + Send + Sync>;

/// Lazily constructed handle to the notification transport.
///
/// The transport is built on the first ping and reused afterwards.
pub struct NotificationBridge {
    transport: OnceLock<Arc<dyn NotificationTransport>>,
    factory: TransportFactory,
}

impl NotificationBridge {
    /// Bridge whose transport is built by `factory` on first use.
    pub fn lazy(factory: impl Fn() -> Arc<dyn NotificationTransport> + Send + Sync + 'static) -> Self {
        Self {
            transport: OnceLock::new(),
            factory: Box::new(factory),
        }
    }

    /// Bridge over an already constructed transport.
    pub fn with_transport(transport: Arc<dyn NotificationTransport>) -> Self {
        let ready = Arc::clone(&transport);
        Self {
            transport: OnceLock::from(transport),
            factory: Box::new(move || Arc::clone(&ready)),
        }
    }

    /// Whether the transport has been constructed.
    pub fn is_initialized(&self) -> bool {
        self.transport.get().is_some()
    }

    fn transport(&self) -> &Arc<dyn NotificationTransport> {
        self.transport.get_or_init(|| {
            info!("notification bridge initialized");
            (self.factory)()
        })
    }

    /// Send one ping to `user`.
    pub async fn notify_ping(&self, user: &UserId, ping: &PingNotification) -> ServiceResult<()> {
        self.transport().notify_ping(user, ping).await
    }
}

impl std::fmt::Debug for NotificationBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationBridge")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use teamhub_core::envelope::NotificationType;
    use teamhub_core::ids::ChannelId;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl NotificationTransport for Counting {
        async fn notify_ping(&self, _user: &UserId, _ping: &PingNotification) -> ServiceResult<()> {
            let _ = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ping() -> PingNotification {
        PingNotification {
            kind: NotificationType::Message,
            sender: "Alice".into(),
            content: "hi".into(),
            channel: ChannelId::from("c1"),
            sender_id: UserId::from("u1"),
        }
    }

    #[tokio::test]
    async fn factory_runs_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(Counting(AtomicUsize::new(0)));
        let bridge = {
            let built = built.clone();
            let transport = transport.clone();
            NotificationBridge::lazy(move || {
                let _ = built.fetch_add(1, Ordering::SeqCst);
                transport.clone() as Arc<dyn NotificationTransport>
            })
        };
        assert!(!bridge.is_initialized());

        bridge.notify_ping(&UserId::from("u2"), &ping()).await.unwrap();
        bridge.notify_ping(&UserId::from("u3"), &ping()).await.unwrap();

        assert!(bridge.is_initialized());
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(transport.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn with_transport_is_ready() {
        let bridge = NotificationBridge::with_transport(Arc::new(Counting(AtomicUsize::new(0))));
        assert!(bridge.is_initialized());
    }
}
