//! Error types for the hub.
//!
//! - [`HubError`]: failures observed while serving a connection or routing
//!   one envelope. [`HubError::is_fatal_to_connection`] and
//!   [`HubError::is_fatal_to_message`] drive what the caller does next.
//! - [`ServiceError`]: failures reported by an external collaborator
//!   (persistence, membership, presence, notification transport).

use thiserror::Error;

use crate::ids::UserId;

/// Hub-level error.
#[derive(Debug, Error)]
pub enum HubError {
    /// Credential missing or rejected at upgrade time.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Transport-level upgrade failure.
    #[error("upgrade failed: {0}")]
    UpgradeFailed(String),

    /// Inbound frame was not a valid envelope.
    #[error("decode error: {0}")]
    Decode(String),

    /// A single recipient could not be written to.
    #[error("recipient {user} unreachable: {reason}")]
    RecipientUnreachable {
        /// Recipient that was skipped.
        user: UserId,
        /// Why the write failed.
        reason: String,
    },

    /// The persistence service failed.
    #[error("persistence failed: {0}")]
    Persistence(#[source] ServiceError),

    /// The membership directory failed.
    #[error("membership lookup failed: {0}")]
    Membership(#[source] ServiceError),

    /// The presence store failed.
    #[error("presence update failed: {0}")]
    Presence(#[source] ServiceError),

    /// The notification transport failed.
    #[error("notification bridge failed: {0}")]
    Bridge(#[source] ServiceError),

    /// Envelope kind is not in the known set.
    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    /// Envelope is well-formed JSON but lacks fields its kind requires.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Sender is not a member of the target channel or workspace.
    #[error("user {user} is not a member of {scope}")]
    NotAMember {
        /// Sender.
        user: UserId,
        /// Channel or workspace the sender targeted.
        scope: String,
    },

    /// A collaborator call exceeded its deadline.
    #[error("{operation} timed out")]
    Timeout {
        /// Collaborator operation that timed out.
        operation: &'static str,
    },

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Whether this error ends the connection it occurred on.
    #[must_use]
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::Unauthenticated(_) | Self::UpgradeFailed(_) | Self::Decode(_))
    }

    /// Whether this error abandons the envelope being routed.
    ///
    /// A non-fatal error (one unreachable recipient, a failed bridge ping,
    /// a presence write) is logged and routing continues.
    #[must_use]
    pub fn is_fatal_to_message(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_)
                | Self::Membership(_)
                | Self::UnknownKind(_)
                | Self::InvalidMessage(_)
                | Self::NotAMember { .. }
                | Self::Timeout { .. }
        )
    }

    /// Short stable label for metrics and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::UpgradeFailed(_) => "upgrade_failed",
            Self::Decode(_) => "decode",
            Self::RecipientUnreachable { .. } => "recipient_unreachable",
            Self::Persistence(_) => "persistence",
            Self::Membership(_) => "membership",
            Self::Presence(_) => "presence",
            Self::Bridge(_) => "bridge",
            Self::UnknownKind(_) => "unknown_kind",
            Self::InvalidMessage(_) => "invalid_message",
            Self::NotAMember { .. } => "not_a_member",
            Self::Timeout { .. } => "timeout",
            Self::Internal(_) => "internal",
        }
    }
}

/// Failure reported by an external collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Backend unreachable or failed internally.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Referenced record does not exist (or is not owned by the actor).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request rejected as invalid.
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Convenience alias for collaborator results.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Convenience alias for hub results.
pub type Result<T> = std::result::Result<T, HubError>;
