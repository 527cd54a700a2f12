//! Coordinator configuration with layered sources.
//!
//! Loading flow:
//! 1. Start with compiled [`CoordinatorConfig::default()`]
//! 2. If a TOML file is given (or `CORTEX_CONFIG` points at one), read it;
//!    missing keys keep their defaults
//! 3. Apply `CORTEX_*` environment overrides (highest priority)
//! 4. Validate ranges

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
    pub planner: PlannerConfig,
    pub cascade: CascadeConfig,
    pub merger: MergerConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Lifetime of a cached worker response.
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 1024,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long a task waits for its dependencies before failing.
    pub dependency_timeout_secs: u64,
    /// Upper bound on a single task's execution.
    pub task_deadline_secs: u64,
    /// Samples kept per worker for timing averages.
    pub stats_window: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            dependency_timeout_secs: 30,
            task_deadline_secs: 120,
            stats_window: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_timeout_secs)
    }

    pub fn task_deadline(&self) -> Duration {
        Duration::from_secs(self.task_deadline_secs)
    }
}

/// How the extra anomaly task decides whether to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtraTaskMode {
    /// Fire when the computed chance exceeds the threshold.
    #[default]
    Threshold,
    /// Fire with probability equal to the computed chance.
    Sampled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub extra_task_mode: ExtraTaskMode,
    pub base_chance: f32,
    /// Multiplied by the world's chaos level.
    pub chaos_weight: f32,
    /// Every `milestone_interval` turns the chance gets `milestone_bonus`.
    pub milestone_interval: u32,
    pub milestone_bonus: f32,
    pub threshold: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            extra_task_mode: ExtraTaskMode::Threshold,
            base_chance: 0.15,
            chaos_weight: 0.3,
            milestone_interval: 5,
            milestone_bonus: 0.05,
            threshold: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    /// Number of rounds the event queue is drained before stopping.
    pub max_chain_depth: usize,
    /// Events at or above this priority are logged as significant.
    pub significant_priority: i32,
    /// Chaos level at which the world raises an anomaly.
    pub chaos_surge_threshold: f32,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: 3,
            significant_priority: 3,
            chaos_surge_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    pub max_choices: usize,
    pub placeholder_narrative: String,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            max_choices: 4,
            placeholder_narrative: "The world holds its breath. Nothing seems to change, \
                                    yet something stirs just out of sight."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub recent_actions_limit: usize,
    pub recent_events_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            recent_actions_limit: 10,
            recent_events_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level. Overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module level overrides (e.g. `narrative_coordinator::cache = "debug"`).
    pub module_levels: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: HashMap::new(),
        }
    }
}

impl CoordinatorConfig {
    /// Load from `CORTEX_CONFIG` if set, otherwise defaults; then env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var("CORTEX_CONFIG").ok().filter(|v| !v.is_empty()) {
            Some(path) => Self::load_from_path(&PathBuf::from(path)),
            None => {
                let mut config = Self::default();
                config.apply_env_overrides();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Load from a TOML file with env overrides. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            debug!(?path, "loading coordinator config from file");
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)?
        } else {
            debug!(?path, "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing sections and keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `CORTEX_*` environment overrides. Invalid values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_u64("CORTEX_CACHE_TTL_SECS", 0, 86_400) {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = read_env_u64("CORTEX_CACHE_MAX_ENTRIES", 1, 1_000_000) {
            self.cache.max_entries = v as usize;
        }
        if let Some(v) = read_env_u64("CORTEX_DEPENDENCY_TIMEOUT_SECS", 1, 3_600) {
            self.scheduler.dependency_timeout_secs = v;
        }
        if let Some(v) = read_env_u64("CORTEX_TASK_DEADLINE_SECS", 1, 3_600) {
            self.scheduler.task_deadline_secs = v;
        }
        if let Some(v) = read_env_u64("CORTEX_MAX_CHAIN_DEPTH", 1, 32) {
            self.cascade.max_chain_depth = v as usize;
        }
        if let Some(v) = read_env_string("CORTEX_EXTRA_TASK_MODE") {
            match parse_extra_task_mode(&v) {
                Some(mode) => self.planner.extra_task_mode = mode,
                None => tracing::warn!(
                    key = "CORTEX_EXTRA_TASK_MODE",
                    value = %v,
                    "invalid env var, ignoring"
                ),
            }
        }
        if let Some(v) = read_env_string("CORTEX_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = read_env_bool("CORTEX_LOG_JSON") {
            self.logging.json = v;
        }
    }

    /// Reject values that would break the engine's invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.max_entries == 0 {
            return Err(ConfigError::InvalidValue("cache.max_entries must be at least 1".into()));
        }
        if self.scheduler.dependency_timeout_secs == 0 || self.scheduler.task_deadline_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler timeouts must be at least 1 second".into(),
            ));
        }
        if self.scheduler.stats_window == 0 {
            return Err(ConfigError::InvalidValue(
                "scheduler.stats_window must be at least 1".into(),
            ));
        }
        if self.cascade.max_chain_depth == 0 {
            return Err(ConfigError::InvalidValue(
                "cascade.max_chain_depth must be at least 1".into(),
            ));
        }
        if self.merger.max_choices == 0 {
            return Err(ConfigError::InvalidValue("merger.max_choices must be at least 1".into()));
        }
        if self.merger.placeholder_narrative.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "merger.placeholder_narrative must not be empty".into(),
            ));
        }
        let unit = 0.0..=1.0;
        for (name, value) in [
            ("planner.base_chance", self.planner.base_chance),
            ("planner.threshold", self.planner.threshold),
            ("cascade.chaos_surge_threshold", self.cascade.chaos_surge_threshold),
        ] {
            if !unit.contains(&value) {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be within 0.0..=1.0, got {value}"
                )));
            }
        }
        Ok(())
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_extra_task_mode(val: &str) -> Option<ExtraTaskMode> {
    match val.trim().to_lowercase().as_str() {
        "threshold" => Some(ExtraTaskMode::Threshold),
        "sampled" | "random" => Some(ExtraTaskMode::Sampled),
        _ => None,
    }
}

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

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}
