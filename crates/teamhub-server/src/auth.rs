//! Identity verification for the upgrade and notification endpoints.
//!
//! The credential is an HS256 JWT carrying the user's ID and display name.
//! It is read from `?token=`, then `Authorization: Bearer`, then the
//! configured cookie.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use metrics::counter;
use serde::{Deserialize, Serialize};
use teamhub_core::errors::HubError;
use teamhub_core::ids::UserId;
use teamhub_core::services::Identity;
use tracing::warn;

use crate::metrics as m;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// Why a credential was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No credential in the query, header or cookie.
    #[error("missing credential")]
    Missing,
    /// Signature, algorithm or claims did not validate.
    #[error("invalid credential: {0}")]
    Invalid(String),
    /// Token is past its expiry.
    #[error("credential expired")]
    Expired,
}

impl From<AuthError> for HubError {
    fn from(e: AuthError) -> Self {
        Self::Unauthenticated(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Verifies session tokens against the shared secret.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    cookie_name: String,
}

impl JwtVerifier {
    /// Verifier for tokens signed with `secret`, also reading `cookie_name`.
    pub fn new(secret: &[u8], cookie_name: impl Into<String>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            cookie_name: cookie_name.into(),
        }
    }

    /// Validate `token` and return the identity it carries.
    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(e.to_string()),
        })?;
        if data.claims.id.is_empty() {
            return Err(AuthError::Invalid("empty user id".into()));
        }
        Ok(Identity {
            user_id: UserId::from(data.claims.id),
            display_name: data.claims.name,
        })
    }

    /// Find the credential in a request and verify it.
    pub fn authenticate(&self, query_token: Option<&str>, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let jar = CookieJar::from_headers(headers);
        let token = query_token
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .or_else(|| bearer_token(headers))
            .or_else(|| jar.get(&self.cookie_name).map(|c| c.value().to_owned()))
            .ok_or(AuthError::Missing)?;
        self.verify(&token)
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("cookie_name", &self.cookie_name)
            .finish_non_exhaustive()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Extractor for a verified caller.
///
/// Rejects with `401` before any upgrade or stream is started.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

impl<S> FromRequestParts<S> for Authenticated
where
    Arc<JwtVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let verifier = Arc::<JwtVerifier>::from_ref(state);
        let query = Query::<TokenQuery>::try_from_uri(&parts.uri).ok().and_then(|Query(q)| q.token);
        match verifier.authenticate(query.as_deref(), &parts.headers) {
            Ok(identity) => Ok(Self(identity)),
            Err(e) => {
                warn!(path = %parts.uri.path(), error = %e, "authentication failed");
                counter!(m::AUTH_FAILURES_TOTAL, "endpoint" => parts.uri.path().to_owned()).increment(1);
                Err(e)
            }
        }
    }
}
