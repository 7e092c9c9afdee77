//! In-process presence table for single-instance deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use teamhub_core::errors::ServiceResult;
use teamhub_core::ids::UserId;
use teamhub_core::services::{Identity, PresenceEntry, PresenceStore};

/// Presence kept in a process-local map.
///
/// Not shared across instances; use the `SQLite` store when several hub
/// processes must agree on who is online.
#[derive(Default)]
pub struct MemoryPresenceStore {
    entries: Mutex<HashMap<UserId, PresenceEntry>>,
}

impl MemoryPresenceStore {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a user currently has an entry.
    pub fn is_online(&self, user: &UserId) -> bool {
        self.entries.lock().contains_key(user)
    }
}

fn cutoff(ttl_secs: u64) -> DateTime<Utc> {
    // clamp to a year so the subtraction cannot overflow
    let ttl = Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX).min(31_536_000));
    Utc::now() - ttl
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_online(&self, identity: &Identity) -> ServiceResult<()> {
        let entry = PresenceEntry {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            refreshed_at: Utc::now(),
        };
        let _ = self.entries.lock().insert(identity.user_id.clone(), entry);
        Ok(())
    }

    async fn set_offline(&self, user: &UserId) -> ServiceResult<()> {
        let _ = self.entries.lock().remove(user);
        Ok(())
    }

    async fn refresh(&self, users: &[UserId]) -> ServiceResult<()> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        for user in users {
            if let Some(entry) = entries.get_mut(user) {
                entry.refreshed_at = now;
            }
        }
        Ok(())
    }

    async fn sweep_expired(&self, ttl_secs: u64) -> ServiceResult<usize> {
        let cutoff = cutoff(ttl_secs);
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.refreshed_at >= cutoff);
        Ok(before - entries.len())
    }

    async fn online(&self, ttl_secs: u64) -> ServiceResult<Vec<PresenceEntry>> {
        let cutoff = cutoff(ttl_secs);
        let mut online: Vec<_> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.refreshed_at >= cutoff)
            .cloned()
            .collect();
        online.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(online)
    }
}
