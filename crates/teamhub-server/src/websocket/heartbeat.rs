//! Heartbeat ping/pong liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::Connection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// Nothing was heard from the peer within the timeout window.
    TimedOut,
    /// The probe could not be queued because the writer is gone.
    SendFailed,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Probe a connection every `interval` until it goes quiet for `timeout`.
///
/// Any inbound frame counts as a reply (see [`Connection::mark_alive`]).
/// The timeout is checked against the last activity, independently of the
/// probe cadence, so a dead peer is detected `timeout` after it last spoke.
pub async fn run_heartbeat(
    connection: Arc<Connection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut probe = time::interval_at(time::Instant::now() + interval, interval);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = connection.last_activity() + timeout;
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            () = time::sleep_until(deadline) => {
                if connection.idle_for() >= timeout {
                    return HeartbeatResult::TimedOut;
                }
            }
            _ = probe.tick() => {
                if !connection.send_ping() {
                    return HeartbeatResult::SendFailed;
                }
            }
        }
    }
}
