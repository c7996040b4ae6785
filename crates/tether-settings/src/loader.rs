//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate cross-field constraints
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{OverflowPolicy, TetherSettings, tether_home};

/// Resolve the settings file path (`$TETHER_SETTINGS` or `~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    read_env_string("TETHER_SETTINGS")
        .map_or_else(|| tether_home().join("settings.json"), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a failed validation is an
/// error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| parse_error(path, source))?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings =
        serde_json::from_value(merged).map_err(|source| parse_error(path, source))?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn parse_error(path: &Path, source: serde_json::Error) -> SettingsError {
    SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    }
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

/// Apply `TETHER_*` environment overrides.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    if let Some(v) = read_env_string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_parsed("TETHER_PORT", |s| parse_u64_range(s, 1, 65_535)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = read_env_parsed("TETHER_MAX_AGENTS", |s| parse_u64_range(s, 1, 1_000)) {
        settings.agents.max_concurrent = v as usize;
    }
    if let Some(v) = read_env_parsed("TETHER_QUEUE_MAX", |s| parse_u64_range(s, 1, 1_000_000)) {
        settings.orchestrator.queue_max_size = v as usize;
    }
    if let Some(v) = read_env_parsed("TETHER_OVERFLOW_POLICY", |s| s.parse::<OverflowPolicy>().ok())
    {
        settings.orchestrator.overflow_policy = v;
    }
    if let Some(v) = read_env_string("TETHER_CHECKPOINT_PATH") {
        settings.compaction.checkpoint_path = PathBuf::from(v);
    }
    if let Some(v) = read_env_string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_parsed("TETHER_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

/// Reject settings the runtime cannot operate with.
pub fn validate(settings: &TetherSettings) -> Result<()> {
    let o = &settings.orchestrator;
    if o.queue_max_size == 0 {
        return Err(SettingsError::invalid("orchestrator.queueMaxSize", "must be > 0"));
    }
    if o.history_capacity == 0 {
        return Err(SettingsError::invalid("orchestrator.historyCapacity", "must be > 0"));
    }
    if o.tick_interval_ms == 0 {
        return Err(SettingsError::invalid("orchestrator.tickIntervalMs", "must be > 0"));
    }
    if settings.agents.max_concurrent == 0 {
        return Err(SettingsError::invalid("agents.maxConcurrent", "must be > 0"));
    }
    if settings.agents.poll_interval_ms == 0 {
        return Err(SettingsError::invalid("agents.pollIntervalMs", "must be > 0"));
    }
    if settings.supervisor.tool_timeout_ms <= o.max_wait_timeout_ms {
        return Err(SettingsError::invalid(
            "supervisor.toolTimeoutMs",
            format!(
                "{} must exceed orchestrator.maxWaitTimeoutMs ({})",
                settings.supervisor.tool_timeout_ms, o.max_wait_timeout_ms
            ),
        ));
    }
    Ok(())
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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_parsed<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let val = std::env::var(name).ok()?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}
