//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TeamhubSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `TEAMHUB_*` environment variable overrides (highest priority)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{PresenceBackend, TeamhubSettings};

/// Resolve the teamhub home directory (`~/.teamhub`).
pub fn teamhub_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".teamhub")
}

/// Resolve the path to the settings file (`~/.teamhub/settings.json`).
pub fn settings_path() -> PathBuf {
    teamhub_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TeamhubSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TeamhubSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<TeamhubSettings> {
    let defaults = serde_json::to_value(TeamhubSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut TeamhubSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Integers must parse and fall within range; booleans accept
/// `true`/`1`/`yes`/`on` and `false`/`0`/`no`/`off`. Invalid values are
/// ignored with a warning.
pub fn apply_overrides_from(settings: &mut TeamhubSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TEAMHUB_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("TEAMHUB_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.usize("TEAMHUB_MAX_MESSAGE_BYTES", 1024, 16 * 1024 * 1024) {
        settings.server.max_message_bytes = v;
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = env.u64("TEAMHUB_PING_INTERVAL_SECS", 1, 3600) {
        settings.heartbeat.ping_interval_secs = v;
    }
    if let Some(v) = env.u64("TEAMHUB_PONG_TIMEOUT_SECS", 1, 7200) {
        settings.heartbeat.pong_timeout_secs = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = env.u64("TEAMHUB_COLLABORATOR_TIMEOUT_MS", 10, 600_000) {
        settings.hub.collaborator_timeout_ms = v;
    }

    // ── Presence ────────────────────────────────────────────────────
    if let Some(v) = env.string("TEAMHUB_PRESENCE_BACKEND") {
        match parse_presence_backend(&v) {
            Some(backend) => settings.presence.backend = backend,
            None => tracing::warn!(key = "TEAMHUB_PRESENCE_BACKEND", value = %v, "invalid presence backend, ignoring"),
        }
    }
    if let Some(v) = env.u64("TEAMHUB_PRESENCE_TTL_SECS", 2, 86_400) {
        settings.presence.ttl_secs = v;
    }
    if let Some(v) = env.string("TEAMHUB_INSTANCE_ID") {
        settings.presence.instance_id = Some(v);
    }

    // ── Bridge ──────────────────────────────────────────────────────
    if let Some(v) = env.bool("TEAMHUB_BRIDGE_ENABLED") {
        settings.bridge.enabled = v;
    }

    // ── Auth / database / logging ───────────────────────────────────
    if let Some(v) = env.string("TEAMHUB_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = env.string("TEAMHUB_DB_PATH") {
        settings.database.path = v;
    }
    if let Some(v) = env.string("TEAMHUB_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TEAMHUB_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a presence backend name.
pub fn parse_presence_backend(val: &str) -> Option<PresenceBackend> {
    match val.to_lowercase().as_str() {
        "memory" => Some(PresenceBackend::Memory),
        "sqlite" => Some(PresenceBackend::Sqlite),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
