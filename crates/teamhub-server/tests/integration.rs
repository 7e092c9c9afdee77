//! End-to-end tests against a listening hub backed by the SQLite store.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use teamhub_core::ids::{ChannelId, MessageId, UserId};
use teamhub_core::services::NotificationTransport;
use teamhub_server::auth::Claims;
use teamhub_server::bridge::{NotificationBridge, SseNotifier};
use teamhub_server::websocket::session::SessionConfig;
use teamhub_server::{HubServer, HubServices, RunningServer, ServerConfig};
use teamhub_store::repositories::MembershipRepo;
use teamhub_store::{ConnectionPool, MemoryPresenceStore, SqliteMembership, SqliteMessageStore};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const SECRET: &str = "integration-secret";

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Harness {
    server: RunningServer,
    pool: ConnectionPool,
    store: SqliteMessageStore,
    presence: Arc<MemoryPresenceStore>,
}

fn token(user: &str) -> String {
    let claims = Claims {
        id: user.into(),
        name: format!("{user} name"),
        exp: chrono::Utc::now().timestamp() + 3600,
    };
    jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

async fn start_with(session: SessionConfig) -> Harness {
    let pool = teamhub_store::connection::new_in_memory().unwrap();
    let presence = Arc::new(MemoryPresenceStore::new());
    let notifier = Arc::new(SseNotifier::new(8, Duration::from_secs(15)));
    let transport = notifier.clone();
    let services = HubServices {
        store: Arc::new(SqliteMessageStore::new(pool.clone())),
        membership: Arc::new(SqliteMembership::new(pool.clone())),
        presence: presence.clone(),
        bridge: Arc::new(NotificationBridge::lazy(move || {
            transport.clone() as Arc<dyn NotificationTransport>
        })),
    };
    let config = ServerConfig {
        jwt_secret: SECRET.into(),
        session,
        ..ServerConfig::default()
    };
    let server = HubServer::new(config, services, notifier, None).listen().await.unwrap();
    Harness {
        server,
        store: SqliteMessageStore::new(pool.clone()),
        pool,
        presence,
    }
}

async fn start() -> Harness {
    start_with(SessionConfig::default()).await
}

impl Harness {
    fn join_channel(&self, channel: &str, users: &[&str]) {
        let conn = self.pool.get().unwrap();
        for user in users {
            let _ = MembershipRepo::add_channel_member(&conn, &ChannelId::from(channel), &UserId::from(*user)).unwrap();
        }
    }

    fn url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.server.addr())
    }

    async fn connect(&self, user: &str) -> Client {
        let (ws, _) = connect_async(self.url(&format!("/ws?token={}", token(user)))).await.unwrap();
        ws
    }

    async fn wait_connections(&self, expected: usize) {
        let mut watch = self.server.hub().watch();
        let _ = tokio::time::timeout(Duration::from_secs(5), watch.wait_for(|v| v.connections() == expected))
            .await
            .expect("registry did not settle")
            .unwrap();
    }
}

async fn send(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next JSON event, skipping control frames.
async fn next_event(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within timeout")
            .expect("stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Read until the close frame and return its code.
async fn close_code(ws: &mut Client) -> u16 {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no close within timeout");
        match frame {
            Some(Ok(Message::Close(Some(close)))) => return u16::from(close.code),
            Some(Ok(Message::Close(None))) => return 1005,
            Some(Ok(_)) => {}
            Some(Err(e)) => panic!("socket error before close: {e}"),
            None => panic!("stream ended without close frame"),
        }
    }
}

async fn assert_silent(ws: &mut Client) {
    let waited = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => return other,
            }
        }
    })
    .await;
    assert!(waited.is_err(), "expected no event, got {waited:?}");
}

#[tokio::test]
async fn broadcast_reaches_members_with_durable_id_and_no_echo() {
    let h = start().await;
    h.join_channel("C1", &["U1", "U2"]);
    let mut u1 = h.connect("U1").await;
    let mut u2 = h.connect("U2").await;
    h.wait_connections(2).await;

    send(&mut u1, json!({"clientID": "c-1", "kind": "broadcast", "channelID": "C1", "content": "hi"})).await;

    let event = next_event(&mut u2).await;
    assert_eq!(event["kind"], "broadcast");
    assert_eq!(event["content"], "hi");
    assert_eq!(event["senderID"], "U1");
    assert_eq!(event["senderName"], "U1 name");
    assert_eq!(event["clientID"], "c-1");

    let id = MessageId::from(event["id"].as_str().unwrap());
    let stored = h.store.get(&id).await.unwrap().expect("durable record");
    assert_eq!(stored.sender_id, UserId::from("U1"));
    assert_eq!(stored.channel_id, ChannelId::from("C1"));
    assert_eq!(stored.content, "hi");

    assert_silent(&mut u1).await;
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn sender_cannot_forge_identity() {
    let h = start().await;
    h.join_channel("C1", &["U1", "U2"]);
    let mut u1 = h.connect("U1").await;
    let mut u2 = h.connect("U2").await;
    h.wait_connections(2).await;

    send(&mut u1, json!({"kind": "broadcast", "channelID": "C1", "content": "spoof", "senderID": "U2"})).await;
    let event = next_event(&mut u2).await;
    assert_eq!(event["senderID"], "U1");
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn delete_removes_record_and_notifies_channel() {
    let h = start().await;
    h.join_channel("C1", &["U1", "U2"]);
    let mut u1 = h.connect("U1").await;
    let mut u2 = h.connect("U2").await;
    h.wait_connections(2).await;

    send(&mut u1, json!({"kind": "broadcast", "channelID": "C1", "content": "oops"})).await;
    let id = next_event(&mut u2).await["id"].as_str().unwrap().to_owned();

    send(&mut u1, json!({"kind": "delete", "id": id, "channelID": "C1"})).await;
    for ws in [&mut u1, &mut u2] {
        let notice = next_event(ws).await;
        assert_eq!(notice["kind"], "delete");
        assert_eq!(notice["id"], id.as_str());
        assert_eq!(notice["channelID"], "C1");
    }
    assert!(h.store.get(&MessageId::from(id.as_str())).await.unwrap().is_none());
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn delete_by_non_author_keeps_record() {
    let h = start().await;
    h.join_channel("C1", &["U1", "U2"]);
    let mut u1 = h.connect("U1").await;
    let mut u2 = h.connect("U2").await;
    h.wait_connections(2).await;

    send(&mut u1, json!({"kind": "broadcast", "channelID": "C1", "content": "mine"})).await;
    let id = next_event(&mut u2).await["id"].as_str().unwrap().to_owned();

    send(&mut u2, json!({"kind": "delete", "id": id})).await;
    assert_silent(&mut u1).await;
    assert!(h.store.get(&MessageId::from(id.as_str())).await.unwrap().is_some());
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn reconnect_supersedes_previous_connection() {
    let h = start().await;
    let mut first = h.connect("U1").await;
    h.wait_connections(1).await;
    let mut second = h.connect("U1").await;

    assert_eq!(close_code(&mut first).await, 4000);
    h.wait_connections(1).await;
    assert!(h.presence.is_online(&UserId::from("U1")));

    send(&mut second, json!({"kind": "ping", "clientID": "still-alive"})).await;
    assert_eq!(next_event(&mut second).await["kind"], "pong");
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn missing_token_is_rejected_before_upgrade() {
    let h = start().await;
    let err = connect_async(h.url("/ws")).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }
    assert_eq!(h.server.hub().view().connections(), 0);
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn application_ping_gets_pong() {
    let h = start().await;
    let mut u1 = h.connect("U1").await;
    send(&mut u1, json!({"kind": "ping", "clientID": "p-1"})).await;
    let pong = next_event(&mut u1).await;
    assert_eq!(pong["kind"], "pong");
    assert_eq!(pong["clientID"], "p-1");
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn undecodable_frame_closes_connection() {
    let h = start().await;
    let mut u1 = h.connect("U1").await;
    h.wait_connections(1).await;

    u1.send(Message::text("not json")).await.unwrap();
    assert_eq!(close_code(&mut u1).await, 4002);
    h.wait_connections(0).await;
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn silent_peer_is_dropped_after_liveness_timeout() {
    let h = start_with(SessionConfig {
        ping_interval: Duration::from_millis(100),
        pong_timeout: Duration::from_millis(300),
        outbound_buffer: 16,
    })
    .await;
    // never polled, so protocol pings go unanswered
    let mut idle = h.connect("U1").await;
    h.wait_connections(1).await;
    assert!(h.presence.is_online(&UserId::from("U1")));

    h.wait_connections(0).await;
    assert!(!h.presence.is_online(&UserId::from("U1")));
    assert_eq!(close_code(&mut idle).await, 4001);
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn health_reports_live_connections() {
    let h = start().await;
    let _u1 = h.connect("U1").await;
    let _u2 = h.connect("U2").await;
    h.wait_connections(2).await;

    let body: Value = reqwest::get(format!("http://{}/health", h.server.addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 2);
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn presence_lists_connected_users() {
    let h = start().await;
    let _u1 = h.connect("U1").await;
    h.wait_connections(1).await;

    let body: Value = reqwest::Client::new()
        .get(format!("http://{}/presence", h.server.addr()))
        .bearer_auth(token("U2"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let online = body.as_array().unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(online[0]["userId"], "U1");
    assert_eq!(online[0]["displayName"], "U1 name");
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn broadcast_pings_notification_stream() {
    let h = start().await;
    h.join_channel("C1", &["U1", "U2"]);
    let mut sse = reqwest::get(format!("http://{}/notifications?token={}", h.server.addr(), token("U2")))
        .await
        .unwrap();
    assert_eq!(sse.status(), 200);

    let mut u1 = h.connect("U1").await;
    h.wait_connections(1).await;
    send(&mut u1, json!({"kind": "broadcast", "channelID": "C1", "content": "ping me"})).await;

    let mut received = String::new();
    while !received.contains("ping me") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), sse.chunk())
            .await
            .expect("no notification within timeout")
            .unwrap()
            .expect("stream ended");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(received.contains("event: ping"));
    assert!(received.contains("\"senderID\":\"U1\""));
    assert!(received.contains("\"channel\":\"C1\""));
    drop(sse);
    assert!(h.server.shutdown().await);
}

#[tokio::test]
async fn shutdown_closes_clients_going_away() {
    let h = start().await;
    let mut u1 = h.connect("U1").await;
    h.wait_connections(1).await;

    let shutdown = tokio::spawn(h.server.shutdown());
    assert_eq!(close_code(&mut u1).await, 1001);
    assert!(shutdown.await.unwrap());
    assert!(!h.presence.is_online(&UserId::from("U1")));
}
