//! Membership repository for `channel_members` and `workspace_members`.

use std::collections::BTreeSet;

use rusqlite::{Connection, params};
use teamhub_core::ids::{ChannelId, UserId, WorkspaceId};

use crate::errors::Result;

/// Membership repository: stateless, every method takes `&Connection`.
pub struct MembershipRepo;

impl MembershipRepo {
    /// Add a user to a channel. Returns whether a row was inserted.
    pub fn add_channel_member(conn: &Connection, channel: &ChannelId, user: &UserId) -> Result<bool> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO channel_members (channel_id, user_id) VALUES (?1, ?2)",
            params![channel.as_str(), user.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Remove a user from a channel. Returns whether a row was removed.
    pub fn remove_channel_member(conn: &Connection, channel: &ChannelId, user: &UserId) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM channel_members WHERE channel_id = ?1 AND user_id = ?2",
            params![channel.as_str(), user.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Members of a channel.
    pub fn channel_members(conn: &Connection, channel: &ChannelId) -> Result<BTreeSet<UserId>> {
        Self::members(
            conn,
            "SELECT user_id FROM channel_members WHERE channel_id = ?1",
            channel.as_str(),
        )
    }

    /// Add a user to a workspace. Returns whether a row was inserted.
    pub fn add_workspace_member(conn: &Connection, workspace: &WorkspaceId, user: &UserId) -> Result<bool> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO workspace_members (workspace_id, user_id) VALUES (?1, ?2)",
            params![workspace.as_str(), user.as_str()],
        )?;
        Ok(changed > 0)
    }

    /// Members of a workspace.
    pub fn workspace_members(conn: &Connection, workspace: &WorkspaceId) -> Result<BTreeSet<UserId>> {
        Self::members(
            conn,
            "SELECT user_id FROM workspace_members WHERE workspace_id = ?1",
            workspace.as_str(),
        )
    }

    fn members(conn: &Connection, sql: &str, key: &str) -> Result<BTreeSet<UserId>> {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))?
            .map(|r| r.map(UserId::from_string))
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(rows)
    }
}
