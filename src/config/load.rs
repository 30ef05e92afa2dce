use std::fs;
use std::path::Path;

use super::schema::{Config, ConfigError, ConfigLayer};

/// Load configuration: defaults, then an optional TOML file, then
/// environment overrides, then validation.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    if let Some(path) = path
        && let Some(layer) = read_layer(path)?
    {
        layer.apply_to(&mut config);
    }
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Load from a file that must exist; environment still wins.
pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
    let layer = read_layer(path)?.ok_or_else(|| ConfigError::Read {
        path: path.display().to_string(),
        reason: "no such file".into(),
    })?;
    let mut config = Config::default();
    layer.apply_to(&mut config);
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

fn read_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

fn apply_env_overrides(config: &mut Config, get: impl Fn(&str) -> Option<String>) {
    if let Some(value) = env_bool("NEXTUP_ENABLED", &get) {
        config.enabled = value;
    }
    if let Some(value) = env_parsed::<f64>("NEXTUP_DAMPING_FACTOR", &get) {
        config.damping_factor = value;
    }
    if let Some(value) = env_parsed::<u32>("NEXTUP_ITERATIONS", &get) {
        config.iterations = value;
    }
    if let Some(value) = env_parsed::<u64>("NEXTUP_CACHE_TTL_SECONDS", &get) {
        config.pagerank_cache_ttl_seconds = value;
    }
    if let Some(value) = env_parsed::<u64>("NEXTUP_RECOMPUTE_INTERVAL_SECONDS", &get) {
        config.recompute_interval_seconds = value;
    }
    if let Some(value) = env_bool("NEXTUP_AUDIT_LOG", &get) {
        config.audit_log = value;
    }
    if let Some(value) = env_bool("NEXTUP_STRICT_MODE", &get) {
        config.strict_mode = value;
    }
}

fn env_bool(key: &str, get: &impl Fn(&str) -> Option<String>) -> Option<bool> {
    let raw = get(key)?;
    match raw.trim() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        "" => None,
        other => {
            tracing::warn!("invalid {key}={other:?}, ignoring");
            None
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, get: &impl Fn(&str) -> Option<String>) -> Option<T> {
    let raw = get(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("invalid {key}={trimmed:?}, ignoring");
            None
        }
    }
}
