use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::RepoId;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{key} out of range: {detail}")]
    OutOfRange { key: &'static str, detail: String },
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch; when false every query reports not-found.
    pub enabled: bool,
    /// Damping factor for the rank iteration, open interval (0, 1).
    pub damping_factor: f64,
    /// Rank iteration count, at least 1.
    pub iterations: u32,
    /// Request-cache freshness window. 0 means every request recomputes.
    pub pagerank_cache_ttl_seconds: u64,
    /// Background recomputation cadence.
    pub recompute_interval_seconds: u64,
    /// Emit an audit record per robot query.
    pub audit_log: bool,
    /// Collapse internal/transient failures to not-found at the boundary.
    pub strict_mode: bool,
    /// Repositories excluded from ranking while the feature stays on
    /// globally.
    pub disabled_repos: BTreeSet<i64>,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            damping_factor: 0.85,
            iterations: 100,
            pagerank_cache_ttl_seconds: 300,
            recompute_interval_seconds: 600,
            audit_log: true,
            strict_mode: false,
            disabled_repos: BTreeSet::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.damping_factor > 0.0 && self.damping_factor < 1.0) {
            return Err(ConfigError::OutOfRange {
                key: "damping_factor",
                detail: format!("{} not in (0, 1)", self.damping_factor),
            });
        }
        if self.iterations < 1 {
            return Err(ConfigError::OutOfRange {
                key: "iterations",
                detail: "must be at least 1".into(),
            });
        }
        if self.recompute_interval_seconds < 1 {
            return Err(ConfigError::OutOfRange {
                key: "recompute_interval_seconds",
                detail: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn enabled_for(&self, repo: RepoId) -> bool {
        self.enabled && !self.disabled_repos.contains(&repo.value())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.pagerank_cache_ttl_seconds)
    }

    pub fn recompute_interval(&self) -> Duration {
        Duration::from_secs(self.recompute_interval_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Compact,
            filter: None,
        }
    }
}

/// Partial configuration from a file or the environment; unset fields
/// leave the base value alone.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigLayer {
    pub enabled: Option<bool>,
    pub damping_factor: Option<f64>,
    pub iterations: Option<u32>,
    pub pagerank_cache_ttl_seconds: Option<u64>,
    pub recompute_interval_seconds: Option<u64>,
    pub audit_log: Option<bool>,
    pub strict_mode: Option<bool>,
    pub disabled_repos: Option<BTreeSet<i64>>,
    pub logging: LoggingLayer,
}

impl ConfigLayer {
    pub fn apply_to(&self, base: &mut Config) {
        if let Some(enabled) = self.enabled {
            base.enabled = enabled;
        }
        if let Some(damping) = self.damping_factor {
            base.damping_factor = damping;
        }
        if let Some(iterations) = self.iterations {
            base.iterations = iterations;
        }
        if let Some(ttl) = self.pagerank_cache_ttl_seconds {
            base.pagerank_cache_ttl_seconds = ttl;
        }
        if let Some(interval) = self.recompute_interval_seconds {
            base.recompute_interval_seconds = interval;
        }
        if let Some(audit) = self.audit_log {
            base.audit_log = audit;
        }
        if let Some(strict) = self.strict_mode {
            base.strict_mode = strict;
        }
        if let Some(repos) = &self.disabled_repos {
            base.disabled_repos = repos.clone();
        }
        self.logging.apply_to(&mut base.logging);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingLayer {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
}

impl LoggingLayer {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if let Some(filter) = self.filter.as_ref() {
            target.filter = Some(filter.clone());
        }
    }
}
