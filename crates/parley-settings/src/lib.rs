//! # parley-settings
//!
//! Configuration for the Parley real-time client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParleySettings::default()`]
//! 2. **User file**: `~/.parley/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `PARLEY_*` overrides (highest priority)
//!
//! There is no global settings instance. Load once at startup and pass the
//! value (or the parts of it a component needs) to whoever needs it.
//!
//! # Usage
//!
//! ```no_run
//! use parley_settings::{load_settings, validate};
//!
//! let settings = load_settings().unwrap_or_default();
//! validate(&settings).expect("endpoint configured");
//! println!("broker: {}", settings.connection.endpoint_url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path,
    load_settings_with_env, settings_path, validate,
};
pub use types::*;
