//! `GET /ws`: authenticate, then upgrade into a session.

use axum::extract::State;
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::response::{IntoResponse, Response};
use teamhub_core::errors::HubError;
use tracing::{info, warn};

use super::session::run_session;
use crate::auth::Authenticated;
use crate::server::AppState;

/// Upgrade an authenticated request.
///
/// The credential is checked before the upgrade headers, so an
/// unauthenticated client gets `401` whether or not it asked to upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            let error = HubError::UpgradeFailed(rejection.body_text());
            warn!(user_id = %identity.user_id, error = %error, "websocket upgrade rejected");
            return rejection.into_response();
        }
    };

    info!(user_id = %identity.user_id, "websocket upgrade accepted");
    let user_id = identity.user_id.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e: axum::Error| {
            let error = HubError::UpgradeFailed(e.to_string());
            warn!(user_id = %user_id, error = %error, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| {
            run_session(
                socket,
                identity,
                state.hub.clone(),
                state.config.session.clone(),
                state.shutdown.clone(),
            )
        })
}
