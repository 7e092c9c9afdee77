//! Per-connection state shared by the session tasks and the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::ws::Utf8Bytes;
use parking_lot::Mutex;
use teamhub_core::errors::HubError;
use teamhub_core::ids::{ConnectionId, UserId};
use teamhub_core::services::Identity;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Replaced by a newer connection for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// No liveness reply within the timeout window.
pub const CLOSE_LIVENESS_TIMEOUT: u16 = 4001;
/// Inbound frame could not be decoded.
pub const CLOSE_DECODE_ERROR: u16 = 4002;

/// A frame queued for the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized event.
    Text(Utf8Bytes),
    /// Liveness probe.
    Ping,
}

/// One live duplex connection bound to an authenticated identity.
///
/// All writes go through a bounded queue drained by a single writer task,
/// so frames from the dispatcher and liveness probes never interleave on the
/// socket.
pub struct Connection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated owner.
    pub user_id: UserId,
    /// Owner's display name.
    pub display_name: String,
    tx: mpsc::Sender<Outbound>,
    /// When this connection was established.
    pub connected_at: Instant,
    last_activity: Mutex<Instant>,
    close_frame: Mutex<Option<(u16, &'static str)>>,
    closed: CancellationToken,
    /// Count of frames dropped because the queue was full or closed.
    pub dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection for `identity` writing into `tx`.
    pub fn new(identity: &Identity, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::generate(),
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            tx,
            connected_at: now,
            last_activity: Mutex::new(now),
            close_frame: Mutex::new(None),
            closed: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a serialized event.
    ///
    /// Never blocks. A full or closed queue is reported as
    /// [`HubError::RecipientUnreachable`] and counted as a drop.
    pub fn send(&self, frame: Utf8Bytes) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(self.unreachable("connection closed"));
        }
        match self.tx.try_send(Outbound::Text(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(self.unreachable("outbound queue full")),
            Err(TrySendError::Closed(_)) => Err(self.unreachable("connection closed")),
        }
    }

    /// Queue a liveness probe. Returns `false` once the writer is gone.
    ///
    /// A full queue still counts as success: the writer is alive and the
    /// probe is simply skipped this round.
    pub fn send_ping(&self) -> bool {
        !matches!(self.tx.try_send(Outbound::Ping), Err(TrySendError::Closed(_)))
    }

    fn unreachable(&self, reason: &str) -> HubError {
        let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        HubError::RecipientUnreachable {
            user: self.user_id.clone(),
            reason: reason.to_string(),
        }
    }

    /// Record inbound activity (any frame, including pongs).
    pub fn mark_alive(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// When the peer was last heard from.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock()
    }

    /// Time since the peer was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Close the connection with `code`.
    ///
    /// The first close wins; later calls keep the original code. Cancels the
    /// reader, writer and liveness tasks of this connection.
    pub fn close(&self, code: u16, reason: &'static str) {
        {
            let mut frame = self.close_frame.lock();
            if frame.is_none() {
                *frame = Some((code, reason));
            }
        }
        self.closed.cancel();
    }

    /// Code and reason of the first [`close`](Self::close) call, if any.
    pub fn close_frame(&self) -> Option<(u16, &'static str)> {
        *self.close_frame.lock()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection closes.
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Build a connection and the receiving end of its outbound queue.
pub fn channel(identity: &Identity, buffer: usize) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (Arc::new(Connection::new(identity, tx)), rx)
}
