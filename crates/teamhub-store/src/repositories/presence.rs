//! Presence repository for the `presence` table.
//!
//! Rows are keyed by `(user_id, instance_id)`, so several hub instances can
//! each hold a row for the same user. A user is online while any row for
//! them is fresher than the TTL. Timestamps are epoch milliseconds.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use teamhub_core::ids::UserId;
use teamhub_core::services::PresenceEntry;

use crate::errors::Result;

/// Presence repository: stateless, every method takes `&Connection`.
pub struct PresenceRepo;

impl PresenceRepo {
    /// Insert or replace this instance's row for a user.
    pub fn upsert(conn: &Connection, user: &UserId, instance: &str, display_name: &str, now_ms: i64) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO presence (user_id, instance_id, display_name, refreshed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (user_id, instance_id)
             DO UPDATE SET display_name = excluded.display_name, refreshed_at = excluded.refreshed_at",
            params![user.as_str(), instance, display_name, now_ms],
        )?;
        Ok(())
    }

    /// Remove this instance's row for a user. Returns whether a row existed.
    pub fn remove(conn: &Connection, user: &UserId, instance: &str) -> Result<bool> {
        let changed = conn.execute(
            "DELETE FROM presence WHERE user_id = ?1 AND instance_id = ?2",
            params![user.as_str(), instance],
        )?;
        Ok(changed > 0)
    }

    /// Bump `refreshed_at` on this instance's rows for `users`.
    pub fn touch(conn: &Connection, users: &[UserId], instance: &str, now_ms: i64) -> Result<usize> {
        let tx = conn.unchecked_transaction()?;
        let mut touched = 0;
        {
            let mut stmt =
                tx.prepare_cached("UPDATE presence SET refreshed_at = ?1 WHERE user_id = ?2 AND instance_id = ?3")?;
            for user in users {
                touched += stmt.execute(params![now_ms, user.as_str(), instance])?;
            }
        }
        tx.commit()?;
        Ok(touched)
    }

    /// Delete rows from any instance last refreshed before `cutoff_ms`.
    pub fn sweep(conn: &Connection, cutoff_ms: i64) -> Result<usize> {
        let removed = conn.execute("DELETE FROM presence WHERE refreshed_at < ?1", params![cutoff_ms])?;
        Ok(removed)
    }

    /// One entry per user with a row refreshed at or after `cutoff_ms`,
    /// carrying their freshest row.
    pub fn online(conn: &Connection, cutoff_ms: i64) -> Result<Vec<PresenceEntry>> {
        let mut stmt = conn.prepare(
            "SELECT user_id, display_name, MAX(refreshed_at) FROM presence
             WHERE refreshed_at >= ?1
             GROUP BY user_id ORDER BY user_id",
        )?;
        let rows = stmt
            .query_map(params![cutoff_ms], |row| {
                let refreshed_ms: i64 = row.get(2)?;
                Ok(PresenceEntry {
                    user_id: UserId::from_string(row.get(0)?),
                    display_name: row.get(1)?,
                    refreshed_at: DateTime::from_timestamp_millis(refreshed_ms).unwrap_or_default(),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Current time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Oldest `refreshed_at` still considered fresh under `ttl_secs`.
pub fn cutoff_ms(ttl_secs: u64) -> i64 {
    let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    now_ms().saturating_sub(ttl_ms)
}
