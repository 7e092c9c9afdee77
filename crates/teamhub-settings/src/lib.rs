//! # teamhub-settings
//!
//! Layered configuration for the teamhub hub.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TeamhubSettings::default()`]
//! 2. **Settings file**: `~/.teamhub/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TEAMHUB_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, teamhub_home};
pub use types::*;
