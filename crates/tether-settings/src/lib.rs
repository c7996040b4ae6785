//! # tether-settings
//!
//! Layered configuration for the tether host.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **Settings file**: `~/.tether/settings.json` or `$TETHER_SETTINGS`,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)
//!
//! Settings are resolved once at startup and passed into component
//! constructors; nothing in the runtime reads the environment on its own.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
