//! In-process notification transport served as Server-Sent Events.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use parking_lot::Mutex;
use teamhub_core::envelope::PingNotification;
use teamhub_core::errors::ServiceResult;
use teamhub_core::ids::UserId;
use teamhub_core::services::NotificationTransport;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, info, warn};

use crate::auth::Authenticated;

/// Per-user fan-out of ping notifications to open SSE streams.
///
/// A user may hold several streams (one per tab or device). Pings for a user
/// with no open stream are discarded.
pub struct SseNotifier {
    channels: Mutex<HashMap<UserId, broadcast::Sender<Arc<PingNotification>>>>,
    buffer: usize,
    keep_alive: Duration,
}

impl SseNotifier {
    /// Notifier buffering `buffer` pings per user.
    pub fn new(buffer: usize, keep_alive: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
            keep_alive,
        }
    }

    /// Open a receiver for `user`'s pings.
    pub fn subscribe(&self, user: &UserId) -> broadcast::Receiver<Arc<PingNotification>> {
        self.channels
            .lock()
            .entry(user.clone())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .subscribe()
    }

    /// Open a stream of `user`'s pings that releases the user's channel when
    /// it is dropped as the last one.
    pub fn stream(self: &Arc<Self>, user: &UserId) -> Subscription {
        Subscription {
            inner: Some(BroadcastStream::new(self.subscribe(user))),
            notifier: Arc::clone(self),
            user: user.clone(),
        }
    }

    fn release(&self, user: &UserId) {
        let mut channels = self.channels.lock();
        if channels.get(user).is_some_and(|tx| tx.receiver_count() == 0) {
            let _ = channels.remove(user);
            debug!(user_id = %user, "notification channel released");
        }
    }

    /// Open streams for `user`.
    pub fn subscriber_count(&self, user: &UserId) -> usize {
        self.channels.lock().get(user).map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop every sender, ending all open streams.
    pub fn close_all(&self) {
        self.channels.lock().clear();
    }
}

/// One open notification stream, see [`SseNotifier::stream`].
pub struct Subscription {
    inner: Option<BroadcastStream<Arc<PingNotification>>>,
    notifier: Arc<SseNotifier>,
    user: UserId,
}

impl Stream for Subscription {
    type Item = Result<Arc<PingNotification>, BroadcastStreamRecvError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.inner.as_mut() {
            Some(inner) => Pin::new(inner).poll_next(cx),
            None => Poll::Ready(None),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // the receiver must be gone before the count is checked
        drop(self.inner.take());
        self.notifier.release(&self.user);
    }
}

#[async_trait]
impl NotificationTransport for SseNotifier {
    async fn notify_ping(&self, user: &UserId, ping: &PingNotification) -> ServiceResult<()> {
        let mut channels = self.channels.lock();
        let Some(tx) = channels.get(user) else {
            debug!(user_id = %user, "no notification stream, ping discarded");
            return Ok(());
        };
        if let Ok(receivers) = tx.send(Arc::new(ping.clone())) {
            debug!(user_id = %user, receivers, "ping queued");
        } else {
            // every stream for this user has ended
            let _ = channels.remove(user);
            debug!(user_id = %user, "stale notification channel removed");
        }
        Ok(())
    }
}

/// `GET /notifications`: stream the caller's pings.
pub async fn notifications_handler(
    State(notifier): State<Arc<SseNotifier>>,
    Authenticated(identity): Authenticated,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!(user_id = %identity.user_id, "notification stream opened");
    let user_id = identity.user_id;
    let stream = notifier.stream(&user_id).filter_map(move |item| match item {
        Ok(ping) => Some(Event::default().event("ping").json_data(ping.as_ref())),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!(user_id = %user_id, skipped, "notification stream lagged");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::new().interval(notifier.keep_alive))
}
