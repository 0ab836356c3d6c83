//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`GatewaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `FACEGATE_*` environment variable overrides
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::GatewaySettings;

/// Resolve the default settings file path (`~/.facegate/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".facegate").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON, or a merged result that
/// fails validation, is an error.
pub fn load_settings_from_path(path: &Path) -> Result<GatewaySettings> {
    let defaults = serde_json::to_value(GatewaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: GatewaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
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

/// Apply `FACEGATE_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut GatewaySettings) {
    apply_overrides(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are ignored and leave the file/default value in place.
pub fn apply_overrides(settings: &mut GatewaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = string("FACEGATE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = string("FACEGATE_PORT").and_then(|v| parse_u16_range(&v, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) =
        string("FACEGATE_MAX_CONNECTIONS").and_then(|v| parse_usize_range(&v, 1, 100_000))
    {
        settings.server.max_connections = v;
    }

    // ── Backends ────────────────────────────────────────────────────
    if let Some(v) = string("FACEGATE_RECOGNITION_URL") {
        settings.recognition.base_url = v;
    }
    if let Some(v) = string("FACEGATE_RECOGNITION_DEADLINE_MS")
        .and_then(|v| parse_u64_range(&v, 1, 600_000))
    {
        settings.recognition.deadline_ms = v;
    }
    if let Some(v) = string("FACEGATE_CHAT_URL") {
        settings.chat.base_url = v;
    }
    if let Some(v) =
        string("FACEGATE_CHAT_DEADLINE_MS").and_then(|v| parse_u64_range(&v, 1, 600_000))
    {
        settings.chat.deadline_ms = v;
    }
    if let Some(v) = string("FACEGATE_MAX_RETRIES").and_then(|v| parse_u32_range(&v, 0, 10)) {
        settings.retry.max_retries = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("FACEGATE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = string("FACEGATE_LOG_JSON").and_then(|v| parse_bool(&v)) {
        settings.logging.json = v;
    }
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
