//! # facegate-settings
//!
//! Configuration for the facegate gateway, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults**: [`GatewaySettings::default()`]
//! 2. **Settings file**: JSON, deep-merged over defaults
//! 3. **Environment variables**: `FACEGATE_*` overrides (highest priority)
//!
//! Command-line flags in the binary are applied on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings_from_path,
    settings_path,
};
pub use types::*;
