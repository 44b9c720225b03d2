//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If `~/.pulse/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PULSE_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{LogLevel, PulseSettings};

/// Resolve the path to the settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. Invalid JSON or values that
/// fail validation return an error.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let mut settings = read_layers(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layers(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default())?;

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

/// Apply environment variable overrides to loaded settings.
///
/// Each env var has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    // ── API settings ────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_API_URL") {
        settings.api.base_url = v;
    }
    if let Some(v) = read_env_string("PULSE_STREAM_PATH") {
        settings.api.stream_path = v;
    }
    if let Some(v) = read_env_string("PULSE_SOCKET_URL") {
        settings.api.socket_url = v;
    }
    if let Some(v) = read_env_string("PULSE_TOKEN") {
        settings.api.token = Some(v);
    }

    // ── Transport settings ──────────────────────────────────────────
    if let Some(v) = read_env_u32("PULSE_MAX_RECONNECT_ATTEMPTS", 0, 1000) {
        settings.stream.max_reconnect_attempts = v;
        settings.socket.max_reconnect_attempts = v;
    }
    if let Some(v) = read_env_u64("PULSE_CONNECT_TIMEOUT_MS", 100, 300_000) {
        settings.stream.connect_timeout_ms = v;
        settings.socket.connect_timeout_ms = v;
    }

    // ── Health settings ─────────────────────────────────────────────
    if let Some(v) = read_env_u64("PULSE_HEALTH_INTERVAL_MS", 1000, 3_600_000) {
        settings.health.interval_ms = v;
    }
    if let Some(v) = read_env_u64("PULSE_PROBE_TIMEOUT_MS", 100, 120_000) {
        settings.health.probe_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("PULSE_DEGRADED_LATENCY_MS", 1, 120_000) {
        settings.health.degraded_latency_ms = v;
    }
    if let Some(v) = read_env_u32("PULSE_FAILURE_THRESHOLD", 1, 100) {
        settings.health.failure_threshold = v;
    }
    if let Some(v) = read_env_u64("PULSE_BREAKER_COOLDOWN_MS", 1000, 3_600_000) {
        settings.health.cooldown_ms = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_LOG_LEVEL") {
        if let Some(level) = parse_log_level(&v) {
            settings.logging.level = level;
        } else {
            tracing::warn!(key = "PULSE_LOG_LEVEL", value = %v, "invalid log level env var, ignoring");
        }
    }
    if let Some(v) = read_env_bool("PULSE_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a log level name (case-insensitive).
pub fn parse_log_level(val: &str) -> Option<LogLevel> {
    serde_json::from_value(Value::String(val.to_lowercase())).ok()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
