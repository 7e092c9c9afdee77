//! Event envelope, the unit of routing between connections.
//!
//! One JSON shape serves both directions. Inbound frames are decoded into an
//! [`Envelope`]; the hub overwrites the sender attribution and resolves
//! `recipients` itself. Outbound frames are the resolved (and, for durable
//! kinds, persisted) envelope re-serialized with the server-assigned `id`.
//!
//! Field names on the wire match what existing clients send (`clientID`,
//! `senderID`, `channelID`, ...), so every field is renamed explicitly.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::HubError;
use crate::ids::{ChannelId, MessageId, UserId, WorkspaceId};

/// Maximum number of characters carried in a ping notification preview.
pub const PREVIEW_MAX_CHARS: usize = 140;

/// Tagged message kind.
///
/// A closed set: every consumer matches it exhaustively. Kinds the hub does
/// not know are preserved in [`MessageKind::Unknown`] so they can be logged
/// instead of failing the decode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Channel chat message; persisted, then fanned out to channel members.
    Broadcast,
    /// Deletion of a persisted channel message.
    Delete,
    /// Direct delivery to an explicit, server-resolved recipient set.
    Private,
    /// Live board edit, fanned out to workspace members; not persisted.
    Board,
    /// System push to an explicit recipient set.
    Notification,
    /// Operational record; never routed to a connection.
    System,
    /// Application-level keepalive sent by clients.
    Ping,
    /// Reply to [`MessageKind::Ping`].
    Pong,
    /// Any kind string the hub does not recognize.
    Unknown(String),
}

impl MessageKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Broadcast => "broadcast",
            Self::Delete => "delete",
            Self::Private => "private",
            Self::Board => "board",
            Self::Notification => "notification",
            Self::System => "system",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for MessageKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "broadcast" => Self::Broadcast,
            "delete" => Self::Delete,
            "private" => Self::Private,
            "board" => Self::Board,
            "notification" => Self::Notification,
            "system" => Self::System,
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            _ => Self::Unknown(s),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Unknown(s) => s,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

/// Routed event envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Echo token chosen by the sender for client-side reconciliation.
    #[serde(rename = "clientID", default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Server-assigned durable ID (set once persisted, or the target of a delete).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Message kind.
    pub kind: MessageKind,
    /// Sender identity. Whatever the wire carries is overwritten server-side.
    #[serde(rename = "senderID", default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    /// Sender display name, set server-side.
    #[serde(rename = "senderName", default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Target channel.
    #[serde(rename = "channelID", default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<ChannelId>,
    /// Target workspace.
    #[serde(rename = "workspaceID", default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<WorkspaceId>,
    /// Message body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Whether this message replies to another.
    #[serde(rename = "isReply", default, skip_serializing_if = "is_false")]
    pub is_reply: bool,
    /// ID of the message being replied to.
    #[serde(rename = "replyToMessage", default, skip_serializing_if = "Option::is_none")]
    pub reply_to_message: Option<String>,
    /// Display name of the author being replied to.
    #[serde(rename = "replyToUserName", default, skip_serializing_if = "Option::is_none")]
    pub reply_to_user_name: Option<String>,
    /// Attachment title.
    #[serde(rename = "attachmentTitle", default, skip_serializing_if = "Option::is_none")]
    pub attachment_title: Option<String>,
    /// Attachment link.
    #[serde(rename = "attachmentLink", default, skip_serializing_if = "Option::is_none")]
    pub attachment_link: Option<String>,
    /// Board diff payload (opaque drawing elements).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub elements: Vec<serde_json::Value>,
    /// Resolved recipient set. Never read from or written to the wire.
    #[serde(skip)]
    pub recipients: BTreeSet<UserId>,
}

impl Envelope {
    /// Create an empty envelope of the given kind.
    pub fn new(kind: MessageKind) -> Self {
        Self {
            client_id: None,
            id: None,
            kind,
            sender_id: None,
            sender_name: None,
            channel_id: None,
            workspace_id: None,
            content: None,
            is_reply: false,
            reply_to_message: None,
            reply_to_user_name: None,
            attachment_title: None,
            attachment_link: None,
            elements: Vec::new(),
            recipients: BTreeSet::new(),
        }
    }

    /// Decode one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, HubError> {
        serde_json::from_str(text).map_err(|e| HubError::Decode(e.to_string()))
    }

    /// Serialize for an outbound frame.
    pub fn to_json(&self) -> Result<String, HubError> {
        serde_json::to_string(self).map_err(|e| HubError::Internal(e.to_string()))
    }

    /// Overwrite sender attribution with the authenticated identity.
    pub fn attribute_to(&mut self, sender_id: &UserId, sender_name: &str) {
        self.sender_id = Some(sender_id.clone());
        self.sender_name = Some(sender_name.to_owned());
    }

    /// Outbound event for a persisted channel message.
    pub fn from_stored(stored: &StoredMessage, client_id: Option<String>, sender_name: Option<String>) -> Self {
        Self {
            client_id,
            id: Some(stored.id.clone()),
            sender_id: Some(stored.sender_id.clone()),
            sender_name,
            channel_id: Some(stored.channel_id.clone()),
            content: Some(stored.content.clone()),
            is_reply: stored.is_reply,
            reply_to_message: stored.reply_to_message.clone(),
            reply_to_user_name: stored.reply_to_user_name.clone(),
            attachment_title: stored.attachment_title.clone(),
            attachment_link: stored.attachment_link.clone(),
            ..Self::new(MessageKind::Broadcast)
        }
    }

    /// Deletion notice referencing a removed message.
    pub fn deletion_notice(id: MessageId, channel_id: ChannelId) -> Self {
        Self {
            id: Some(id),
            channel_id: Some(channel_id),
            ..Self::new(MessageKind::Delete)
        }
    }

    /// Reply to an application-level ping.
    pub fn pong(client_id: Option<String>) -> Self {
        Self {
            client_id,
            ..Self::new(MessageKind::Pong)
        }
    }
}

/// A channel message as handed to the persistence service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMessage {
    /// Channel the message belongs to.
    pub channel_id: ChannelId,
    /// Author.
    pub sender_id: UserId,
    /// Body.
    pub content: String,
    /// Reply flag.
    pub is_reply: bool,
    /// Replied-to message.
    pub reply_to_message: Option<String>,
    /// Replied-to author name.
    pub reply_to_user_name: Option<String>,
    /// Attachment title.
    pub attachment_title: Option<String>,
    /// Attachment link.
    pub attachment_link: Option<String>,
}

impl NewMessage {
    /// Extract the durable part of a `broadcast` envelope.
    ///
    /// Fails when the channel or the (server-set) sender is missing.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, HubError> {
        let channel_id = envelope
            .channel_id
            .clone()
            .ok_or_else(|| HubError::InvalidMessage("broadcast without channelID".into()))?;
        let sender_id = envelope
            .sender_id
            .clone()
            .ok_or_else(|| HubError::InvalidMessage("broadcast without sender".into()))?;
        Ok(Self {
            channel_id,
            sender_id,
            content: envelope.content.clone().unwrap_or_default(),
            is_reply: envelope.is_reply,
            reply_to_message: envelope.reply_to_message.clone(),
            reply_to_user_name: envelope.reply_to_user_name.clone(),
            attachment_title: envelope.attachment_title.clone(),
            attachment_link: envelope.attachment_link.clone(),
        })
    }
}

/// A persisted channel message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Durable ID.
    pub id: MessageId,
    /// Channel.
    pub channel_id: ChannelId,
    /// Author.
    pub sender_id: UserId,
    /// Body.
    pub content: String,
    /// Reply flag.
    pub is_reply: bool,
    /// Replied-to message.
    pub reply_to_message: Option<String>,
    /// Replied-to author name.
    pub reply_to_user_name: Option<String>,
    /// Attachment title.
    pub attachment_title: Option<String>,
    /// Attachment link.
    pub attachment_link: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Materialize a stored record from a new message and its assigned ID.
    pub fn from_new(id: MessageId, message: NewMessage, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            channel_id: message.channel_id,
            sender_id: message.sender_id,
            content: message.content,
            is_reply: message.is_reply,
            reply_to_message: message.reply_to_message,
            reply_to_user_name: message.reply_to_user_name,
            attachment_title: message.attachment_title,
            attachment_link: message.attachment_link,
            created_at,
        }
    }
}

/// Identifies a message removed by the persistence service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeletedMessage {
    /// Removed message.
    pub id: MessageId,
    /// Channel it belonged to.
    pub channel_id: ChannelId,
}

/// Category of an out-of-band ping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    /// A new channel message.
    Message,
}

/// Lightweight payload pushed through the notification bridge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingNotification {
    /// Notification category.
    #[serde(rename = "type")]
    pub kind: NotificationType,
    /// Sender display name.
    pub sender: String,
    /// Content preview.
    pub content: String,
    /// Channel the message was posted to.
    pub channel: ChannelId,
    /// Sender identity.
    #[serde(rename = "senderID")]
    pub sender_id: UserId,
}

impl PingNotification {
    /// Build a message ping for a persisted message.
    pub fn for_message(stored: &StoredMessage, sender_name: &str) -> Self {
        Self {
            kind: NotificationType::Message,
            sender: sender_name.to_owned(),
            content: preview(&stored.content, PREVIEW_MAX_CHARS),
            channel: stored.channel_id.clone(),
            sender_id: stored.sender_id.clone(),
        }
    }
}

/// Truncate `content` to at most `max_chars` characters, appending `…` when cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &content[..idx]),
        None => content.to_owned(),
    }
}
