//! # poker-settings
//!
//! Configuration for the planning poker server, loaded from three layers
//! (in priority order):
//! 1. **Compiled defaults**: [`PokerSettings::default()`]
//! 2. **User file**: `~/.poker/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `POKER_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, poker_home,
    settings_path,
};
pub use types::{LoggingSettings, PokerSettings, ServerSettings, SessionSettings, StoreSettings};
