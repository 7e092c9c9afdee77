//! WebSocket session lifecycle: one authenticated peer from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use teamhub_core::envelope::{Envelope, MessageKind};
use teamhub_core::services::Identity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{
    self, CLOSE_DECODE_ERROR, CLOSE_GOING_AWAY, CLOSE_LIVENESS_TIMEOUT, CLOSE_NORMAL, Connection, Outbound,
};
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::hub::HubHandle;
use crate::metrics as m;

/// How long the writer gets to flush the close frame after the reader stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the socket stays open for the peer to answer our close frame.
const CLOSE_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-connection tuning.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Interval between liveness probes.
    pub ping_interval: Duration,
    /// Silence after which the peer is considered dead.
    pub pong_timeout: Duration,
    /// Outbound frames buffered before writes are dropped.
    pub outbound_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            pong_timeout: Duration::from_secs(60),
            outbound_buffer: 256,
        }
    }
}

/// Run a session for an authenticated peer.
///
/// 1. Registers the connection with the hub
/// 2. Spawns the writer (sole owner of the socket sink) and the heartbeat
/// 3. Decodes inbound frames, answers `ping` events, attributes and forwards
///    everything else to the hub
/// 4. On any termination, closes the connection and sends exactly one
///    disconnect to the hub
#[instrument(skip_all, fields(user_id = %identity.user_id))]
pub async fn run_session(
    ws: WebSocket,
    identity: Identity,
    hub: HubHandle,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let (conn, send_rx) = connection::channel(&identity, config.outbound_buffer);
    let closed = conn.closed_token();

    info!(connection_id = %conn.id, "client connected");
    counter!(m::WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(m::WS_CONNECTIONS_ACTIVE).increment(1.0);

    let writer = tokio::spawn(write_loop(ws_tx, send_rx, conn.clone()));

    if let Err(e) = hub.connect(conn.clone()).await {
        warn!(error = %e, "hub unavailable, dropping connection");
        conn.close(CLOSE_GOING_AWAY, "server unavailable");
        finish(&conn, writer).await;
        return;
    }

    let heartbeat = tokio::spawn({
        let conn = conn.clone();
        let interval = config.ping_interval;
        let timeout = config.pong_timeout;
        let cancel = closed.clone();
        async move {
            match run_heartbeat(conn.clone(), interval, timeout, cancel).await {
                HeartbeatResult::TimedOut => {
                    warn!(idle_secs = conn.idle_for().as_secs(), "liveness timeout, closing");
                    counter!(m::LIVENESS_TIMEOUTS_TOTAL).increment(1);
                    conn.close(CLOSE_LIVENESS_TIMEOUT, "liveness timeout");
                }
                HeartbeatResult::SendFailed => conn.close(CLOSE_NORMAL, ""),
                HeartbeatResult::Cancelled => {}
            }
        }
    });

    loop {
        let frame = tokio::select! {
            () = closed.cancelled() => break,
            () = shutdown.cancelled() => {
                conn.close(CLOSE_GOING_AWAY, "server shutting down");
                break;
            }
            frame = ws_rx.next() => frame,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text.to_string(),
            Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    reject_frame(&conn, "binary frame is not UTF-8");
                    break;
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                conn.mark_alive();
                continue;
            }
            Some(Ok(Message::Close(_))) => {
                info!("client sent close frame");
                conn.close(CLOSE_NORMAL, "");
                break;
            }
            Some(Err(e)) => {
                debug!(error = %e, "socket read failed");
                conn.close(CLOSE_NORMAL, "");
                break;
            }
            None => {
                conn.close(CLOSE_NORMAL, "");
                break;
            }
        };

        conn.mark_alive();
        let mut envelope = match Envelope::decode(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                reject_frame(&conn, &e.to_string());
                break;
            }
        };

        if envelope.kind == MessageKind::Ping {
            match Envelope::pong(envelope.client_id.take()).to_json() {
                Ok(json) => {
                    if let Err(e) = conn.send(json.into()) {
                        debug!(error = %e, "pong dropped");
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode pong"),
            }
            continue;
        }

        envelope.attribute_to(&conn.user_id, &conn.display_name);
        if let Err(e) = hub.submit(envelope).await {
            warn!(error = %e, "hub unavailable, closing");
            conn.close(CLOSE_GOING_AWAY, "server unavailable");
            break;
        }
    }

    heartbeat.abort();
    if let Err(e) = hub.disconnect(conn.user_id.clone(), conn.id.clone()).await {
        debug!(error = %e, "disconnect not delivered, hub stopped");
    }
    await_close_reply(&mut ws_rx).await;
    finish(&conn, writer).await;
}

/// Keep reading until the peer answers the close handshake or the stream
/// ends. Dropping the socket with unread frames resets the TCP connection,
/// and the peer would never see the close code.
async fn await_close_reply(ws_rx: &mut SplitStream<WebSocket>) {
    let replied = tokio::time::timeout(CLOSE_REPLY_TIMEOUT, async {
        while let Some(Ok(frame)) = ws_rx.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
    })
    .await;
    if replied.is_err() {
        debug!("peer did not answer the close frame");
    }
}

fn reject_frame(conn: &Connection, reason: &str) {
    warn!(reason, "undecodable frame, closing");
    counter!(m::DECODE_ERRORS_TOTAL).increment(1);
    conn.close(CLOSE_DECODE_ERROR, "decode error");
}

async fn finish(conn: &Arc<Connection>, writer: tokio::task::JoinHandle<()>) {
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await.is_err() {
        abort.abort();
    }

    let code = conn.close_frame().map_or(CLOSE_NORMAL, |(code, _)| code);
    info!(connection_id = %conn.id, code, dropped = conn.drop_count(), "client disconnected");
    counter!(m::WS_DISCONNECTIONS_TOTAL, "code" => code.to_string()).increment(1);
    gauge!(m::WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(m::WS_CONNECTION_DURATION_SECONDS).record(conn.age().as_secs_f64());
}

/// Drain the outbound queue onto the socket until the connection closes,
/// then send the close frame. The socket itself is released once both
/// halves are dropped.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<Connection>,
) {
    let closed = conn.closed_token();
    loop {
        let outbound = tokio::select! {
            biased;
            () = closed.cancelled() => break,
            outbound = rx.recv() => outbound,
        };
        let message = match outbound {
            Some(Outbound::Text(text)) => Message::Text(text),
            Some(Outbound::Ping) => Message::Ping(Vec::new().into()),
            None => break,
        };
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "socket write failed");
            conn.close(CLOSE_NORMAL, "");
            return;
        }
    }

    let (code, reason) = conn.close_frame().unwrap_or((CLOSE_NORMAL, ""));
    let frame = CloseFrame {
        code,
        reason: Utf8Bytes::from_static(reason),
    };
    // The read half stays open until the peer answers, see `await_close_reply`.
    let _ = sink.send(Message::Close(Some(frame))).await;
}
