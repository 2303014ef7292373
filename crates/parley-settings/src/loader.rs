//! Reads `ParleySettings` from three layers, later ones winning: the
//! built-in defaults, the JSON settings file (when present), and `PARLEY_*`
//! environment variables.
//!
//! The file only has to name the keys it changes. It is overlaid on the
//! serialized defaults key by key: nested objects recurse, any other value
//! (arrays included) replaces the default wholesale, and an explicit `null`
//! leaves the default alone.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, ParleySettings};

const SETTINGS_DIR: &str = ".parley";
const SETTINGS_FILE: &str = "settings.json";

/// `$HOME/.parley/settings.json`, or under `/tmp` when `HOME` is unset.
pub fn settings_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_else(|| OsString::from("/tmp"));
    [home.as_os_str(), SETTINGS_DIR.as_ref(), SETTINGS_FILE.as_ref()]
        .into_iter()
        .collect()
}

/// All three layers, reading the file at [`settings_path`].
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// All three layers, reading the file at `path` and the process environment.
///
/// No file at `path` is not an error. A file that is not valid JSON, or
/// does not fit the settings shape, is.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    load_settings_with_env(path, |name| std::env::var(name).ok())
}

/// Same as [`load_settings_from_path`], with variables looked up through
/// `env` so tests need not touch the process environment.
pub fn load_settings_with_env<F>(path: &Path, env: F) -> Result<ParleySettings>
where
    F: Fn(&str) -> Option<String>,
{
    let mut layered = serde_json::to_value(ParleySettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!(?path, "overlaying settings file");
            merge_into(&mut layered, serde_json::from_str(&text)?);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no settings file, keeping defaults");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: ParleySettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings, env);
    Ok(settings)
}

/// Overlay `source` on `target` and return the result.
pub fn deep_merge(mut target: Value, source: Value) -> Value {
    merge_into(&mut target, source);
    target
}

fn merge_into(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay.into_iter().filter(|(_, v)| !v.is_null()) {
                match base.get_mut(&key) {
                    Some(slot) => merge_into(slot, value),
                    None => {
                        let _ = base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `PARLEY_*` overrides. Invalid values are logged and ignored.
pub fn apply_env_overrides<F>(settings: &mut ParleySettings, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read_string = |name: &str| env(name).filter(|v| !v.is_empty());
    let read_u64 = |name: &str, min: u64, max: u64| {
        let val = env(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    };
    let read_bool = |name: &str| {
        let val = env(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    };

    // ── Connection ──────────────────────────────────────────────────
    let conn = &mut settings.connection;
    if let Some(v) = read_string("PARLEY_ENDPOINT_URL") {
        conn.endpoint_url = v;
    }
    if let Some(v) = read_u64("PARLEY_RECONNECT_DELAY_MS", 1, 3_600_000) {
        conn.reconnect_delay_ms = v;
    }
    if let Some(v) = read_u64("PARLEY_CONNECT_TIMEOUT_MS", 100, 600_000) {
        conn.connect_timeout_ms = v;
    }
    if let Some(v) = read_u64("PARLEY_HEARTBEAT_OUTGOING_MS", 0, 3_600_000) {
        conn.heartbeat_outgoing_ms = v;
    }
    if let Some(v) = read_u64("PARLEY_HEARTBEAT_INCOMING_MS", 0, 3_600_000) {
        conn.heartbeat_incoming_ms = v;
    }
    if let Some(v) = read_bool("PARLEY_RESUBSCRIBE") {
        conn.resubscribe_on_reconnect = v;
    }
    if let Some(v) = read_string("PARLEY_DEFAULT_TOPIC") {
        conn.default_topic = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string("PARLEY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_string("PARLEY_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => tracing::warn!(value = %v, "invalid PARLEY_LOG_FORMAT, ignoring"),
        }
    }
}

/// Check the settings a connection cannot start without.
pub fn validate(settings: &ParleySettings) -> Result<()> {
    let url = settings.connection.endpoint_url.trim();
    if url.is_empty() {
        return Err(SettingsError::InvalidValue(
            "connection.endpointUrl is required".to_string(),
        ));
    }
    let parsed = Url::parse(url).map_err(|e| {
        SettingsError::InvalidValue(format!("connection.endpointUrl {url:?} is malformed: {e}"))
    })?;
    if !matches!(parsed.scheme(), "ws" | "wss") {
        return Err(SettingsError::InvalidValue(format!(
            "connection.endpointUrl must use ws:// or wss://, got {url}"
        )));
    }
    if settings.connection.reconnect_delay_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "connection.reconnectDelayMs must be positive".to_string(),
        ));
    }
    Ok(())
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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse `pretty` / `json` (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "pretty" | "text" => Some(LogFormat::Pretty),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}
