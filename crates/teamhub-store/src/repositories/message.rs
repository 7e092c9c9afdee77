//! Message repository for the `messages` table.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};
use teamhub_core::envelope::{NewMessage, StoredMessage};
use teamhub_core::ids::{ChannelId, MessageId, UserId};

use crate::errors::Result;

const COLUMNS: &str = "id, channel_id, sender_id, content, is_reply, reply_to_message, \
                       reply_to_user_name, attachment_title, attachment_link, created_at";

/// Message repository: stateless, every method takes `&Connection`.
pub struct MessageRepo;

impl MessageRepo {
    /// Insert a message under `id` and return the stored record.
    pub fn insert(
        conn: &Connection,
        id: MessageId,
        message: NewMessage,
        created_at: DateTime<Utc>,
    ) -> Result<StoredMessage> {
        let _ = conn.execute(
            "INSERT INTO messages (id, channel_id, sender_id, content, is_reply, reply_to_message,
                 reply_to_user_name, attachment_title, attachment_link, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.as_str(),
                message.channel_id.as_str(),
                message.sender_id.as_str(),
                message.content,
                message.is_reply,
                message.reply_to_message,
                message.reply_to_user_name,
                message.attachment_title,
                message.attachment_link,
                created_at.to_rfc3339(),
            ],
        )?;
        Ok(StoredMessage::from_new(id, message, created_at))
    }

    /// Get a message by ID.
    pub fn get(conn: &Connection, id: &MessageId) -> Result<Option<StoredMessage>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM messages WHERE id = ?1"),
                params![id.as_str()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Delete a message only if `actor` authored it.
    ///
    /// Returns the channel the message belonged to, or `None` when no
    /// matching `(id, actor)` row existed.
    pub fn delete_owned(conn: &Connection, id: &MessageId, actor: &UserId) -> Result<Option<ChannelId>> {
        let channel: Option<String> = conn
            .query_row(
                "DELETE FROM messages WHERE id = ?1 AND sender_id = ?2 RETURNING channel_id",
                params![id.as_str(), actor.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(channel.map(ChannelId::from))
    }

    /// Most recent messages in a channel, newest first.
    pub fn recent_for_channel(conn: &Connection, channel: &ChannelId, limit: u32) -> Result<Vec<StoredMessage>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM messages WHERE channel_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(params![channel.as_str(), limit], Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
        let created_at: String = row.get(9)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?
            .with_timezone(&Utc);
        Ok(StoredMessage {
            id: MessageId::from_string(row.get(0)?),
            channel_id: ChannelId::from_string(row.get(1)?),
            sender_id: UserId::from_string(row.get(2)?),
            content: row.get(3)?,
            is_reply: row.get(4)?,
            reply_to_message: row.get(5)?,
            reply_to_user_name: row.get(6)?,
            attachment_title: row.get(7)?,
            attachment_link: row.get(8)?,
            created_at,
        })
    }
}
