//! HTTP surface and server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use teamhub_core::services::{PresenceEntry, PresenceStore};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::{Authenticated, JwtVerifier};
use crate::bridge::SseNotifier;
use crate::bridge::sse::notifications_handler;
use crate::config::ServerConfig;
use crate::health::{HealthResponse, health_check};
use crate::hub::{Dispatcher, HubHandle, HubServices};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::handler::ws_handler;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    /// Dispatcher queues.
    pub hub: HubHandle,
    /// Session token verifier.
    pub verifier: Arc<JwtVerifier>,
    /// Notification streams.
    pub notifier: Arc<SseNotifier>,
    /// Shared online table, read by `/presence`.
    pub presence: Arc<dyn PresenceStore>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
    /// Server start time.
    pub start_time: Instant,
    /// Prometheus handle, if a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

impl FromRef<AppState> for Arc<SseNotifier> {
    fn from_ref(state: &AppState) -> Self {
        state.notifier.clone()
    }
}

/// A configured, not yet listening hub server.
pub struct HubServer {
    state: AppState,
    dispatcher: Dispatcher,
    coordinator: ShutdownCoordinator,
}

impl HubServer {
    /// Wire the dispatcher and HTTP state.
    ///
    /// `notifier` serves `/notifications`; it is usually also the transport
    /// behind `services.bridge`.
    pub fn new(
        config: ServerConfig,
        services: HubServices,
        notifier: Arc<SseNotifier>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let coordinator = ShutdownCoordinator::new();
        let presence = services.presence.clone();
        let (dispatcher, hub) = Dispatcher::new(services, config.hub.clone(), coordinator.token());
        let verifier = Arc::new(JwtVerifier::new(config.jwt_secret.as_bytes(), config.cookie_name.clone()));
        let state = AppState {
            hub,
            verifier,
            notifier,
            presence,
            config: Arc::new(config),
            shutdown: coordinator.token(),
            start_time: Instant::now(),
            metrics,
        };
        Self {
            state,
            dispatcher,
            coordinator,
        }
    }

    /// Handle to the dispatcher queues.
    pub fn hub(&self) -> &HubHandle {
        &self.state.hub
    }

    /// Build the axum router.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/notifications", get(notifications_handler))
            .route("/presence", get(presence_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind, start the dispatcher and serve until shut down.
    pub async fn listen(self) -> std::io::Result<RunningServer> {
        let config = &self.state.config;
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();

        let dispatcher = tokio::spawn(self.dispatcher.run());
        let token = self.coordinator.token();
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        info!(%addr, "teamhub listening");

        Ok(RunningServer {
            addr,
            hub: self.state.hub,
            notifier: self.state.notifier,
            shutdown_timeout: self.state.config.shutdown_timeout,
            coordinator: self.coordinator,
            tasks: vec![server, dispatcher],
        })
    }
}

/// A listening server.
pub struct RunningServer {
    addr: SocketAddr,
    hub: HubHandle,
    notifier: Arc<SseNotifier>,
    shutdown_timeout: std::time::Duration,
    coordinator: ShutdownCoordinator,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Handle to the dispatcher queues.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Token cancelled at shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.coordinator.token()
    }

    /// Close every connection and stream, then drain the server and
    /// dispatcher. Returns `false` if the drain window elapsed.
    pub async fn shutdown(self) -> bool {
        info!("shutting down");
        self.notifier.close_all();
        self.coordinator
            .graceful_shutdown(self.tasks, Some(self.shutdown_timeout))
            .await
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health_check(state.start_time, state.hub.view().connections()))
}

/// Users online on any hub instance, freshest row per user.
async fn presence_handler(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
) -> Result<Json<Vec<PresenceEntry>>, StatusCode> {
    let hub = &state.config.hub;
    match tokio::time::timeout(hub.collaborator_timeout, state.presence.online(hub.presence_ttl.as_secs())).await {
        Ok(Ok(entries)) => Ok(Json(entries)),
        Ok(Err(e)) => {
            warn!(error = %e, "presence lookup failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(_) => {
            warn!("presence lookup timed out");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.as_ref().map(metrics::render).unwrap_or_default()
}
