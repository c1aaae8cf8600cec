//! Coordination configuration
//!
//! ## Precedence (highest to lowest)
//!
//! 1. Environment variable overrides (`MOA_*`)
//! 2. Values from the TOML file
//! 3. Built-in defaults
//!
//! | Section                 | Knob                      | Default |
//! |-------------------------|---------------------------|---------|
//! | consensus               | per-category thresholds   | 0.60 – 0.80 |
//! | dispatch                | agent_timeout_ms          | 200     |
//! | dispatch                | max_agents                | 4       |
//! | hooks                   | max_concurrent_hooks      | 8       |
//! | hooks.budgets           | critical / other (ms)     | 20 / 50 |
//! | hooks.cache             | capacity / ttl_ms         | 1000 / 60000 |
//! | hooks.circuit_breaker   | failure_threshold         | 5       |

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::CHANNEL_CAPACITY;
use crate::hooks::circuit_breaker::CircuitBreakerConfig;
use crate::hooks::types::HookPriority;
use crate::router::task_classifier::{RequestCategory, MAX_SELECTED_AGENTS};

/// Environment-variable names for overrides.
pub const ENV_CONSENSUS_THRESHOLD: &str = "MOA_CONSENSUS_THRESHOLD";
pub const ENV_AGENT_TIMEOUT_MS: &str = "MOA_AGENT_TIMEOUT_MS";
pub const ENV_MAX_AGENTS: &str = "MOA_MAX_AGENTS";
pub const ENV_MAX_CONCURRENT_HOOKS: &str = "MOA_MAX_CONCURRENT_HOOKS";
pub const ENV_CACHE_CAPACITY: &str = "MOA_CACHE_CAPACITY";
pub const ENV_CACHE_TTL_MS: &str = "MOA_CACHE_TTL_MS";
pub const ENV_BREAKER_FAILURE_THRESHOLD: &str = "MOA_BREAKER_FAILURE_THRESHOLD";
pub const ENV_BREAKER_RESET_MS: &str = "MOA_BREAKER_RESET_MS";

const DEFAULT_AGENT_TIMEOUT_MS: u64 = 200;
const DEFAULT_MAX_HOOK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CONCURRENT_HOOKS: usize = 8;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidOverride { key: &'static str, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Consensus thresholds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Applies to every category without an explicit entry
    pub default_threshold: Option<f64>,
    /// Per-category overrides, keyed by category name
    pub category_thresholds: BTreeMap<String, f64>,
}

impl ConsensusConfig {
    /// Threshold for `category`: explicit entry, then global override,
    /// then the category's built-in default.
    pub fn threshold_for(&self, category: RequestCategory) -> f64 {
        self.category_thresholds
            .get(&category.to_string())
            .copied()
            .or(self.default_threshold)
            .unwrap_or_else(|| category.default_threshold())
    }
}

/// Agent fan-out settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub agent_timeout_ms: u64,
    pub max_agents: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            agent_timeout_ms: DEFAULT_AGENT_TIMEOUT_MS,
            max_agents: MAX_SELECTED_AGENTS,
        }
    }
}

impl DispatchConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

/// Hard per-event budgets by priority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub critical_ms: u64,
    pub high_ms: u64,
    pub medium_ms: u64,
    pub low_ms: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            critical_ms: 20,
            high_ms: 50,
            medium_ms: 50,
            low_ms: 50,
        }
    }
}

impl BudgetConfig {
    pub fn budget_for(&self, priority: HookPriority) -> Duration {
        Duration::from_millis(match priority {
            HookPriority::Critical => self.critical_ms,
            HookPriority::High => self.high_ms,
            HookPriority::Medium => self.medium_ms,
            HookPriority::Low => self.low_ms,
        })
    }
}

/// Result cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub capacity: usize,
    pub ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 1_000,
            ttl_ms: 60_000,
            sweep_interval_ms: 30_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Hook pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Ceiling for any single hook's timeout
    pub max_hook_timeout_ms: u64,
    /// Pipeline-wide limit on concurrently running hooks
    pub max_concurrent_hooks: usize,
    pub budgets: BudgetConfig,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_hook_timeout_ms: DEFAULT_MAX_HOOK_TIMEOUT_MS,
            max_concurrent_hooks: DEFAULT_MAX_CONCURRENT_HOOKS,
            budgets: BudgetConfig::default(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn max_hook_timeout(&self) -> Duration {
        Duration::from_millis(self.max_hook_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_hook_timeout_ms == 0 {
            return Err("hooks.max_hook_timeout_ms must be positive".to_string());
        }
        if self.max_concurrent_hooks == 0 {
            return Err("hooks.max_concurrent_hooks must be at least 1".to_string());
        }
        let b = &self.budgets;
        if [b.critical_ms, b.high_ms, b.medium_ms, b.low_ms].contains(&0) {
            return Err("hooks.budgets must all be positive".to_string());
        }
        if self.cache.enabled && self.cache.sweep_interval_ms == 0 {
            return Err("hooks.cache.sweep_interval_ms must be positive".to_string());
        }
        self.circuit_breaker.validate()
    }
}

/// Notification channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub capacity: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub consensus: ConsensusConfig,
    pub dispatch: DispatchConfig,
    pub hooks: PipelineConfig,
    pub notifications: NotificationConfig,
}

fn parse_override<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigError> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidOverride { key, value }),
    }
}

impl CoordinationConfig {
    /// Parse a TOML document; missing fields take defaults
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Parse, apply environment overrides, and validate
    pub fn load(raw: &str) -> Result<Self, ConfigError> {
        let mut config = Self::from_toml_str(raw)?;
        config.apply_env_overrides()?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Apply `MOA_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key → value lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| (key, lookup(key));

        let (key, raw) = get(ENV_CONSENSUS_THRESHOLD);
        if let Some(v) = parse_override::<f64>(key, raw)? {
            self.consensus.default_threshold = Some(v);
        }
        let (key, raw) = get(ENV_AGENT_TIMEOUT_MS);
        if let Some(v) = parse_override(key, raw)? {
            self.dispatch.agent_timeout_ms = v;
        }
        let (key, raw) = get(ENV_MAX_AGENTS);
        if let Some(v) = parse_override(key, raw)? {
            self.dispatch.max_agents = v;
        }
        let (key, raw) = get(ENV_MAX_CONCURRENT_HOOKS);
        if let Some(v) = parse_override(key, raw)? {
            self.hooks.max_concurrent_hooks = v;
        }
        let (key, raw) = get(ENV_CACHE_CAPACITY);
        if let Some(v) = parse_override(key, raw)? {
            self.hooks.cache.capacity = v;
        }
        let (key, raw) = get(ENV_CACHE_TTL_MS);
        if let Some(v) = parse_override(key, raw)? {
            self.hooks.cache.ttl_ms = v;
        }
        let (key, raw) = get(ENV_BREAKER_FAILURE_THRESHOLD);
        if let Some(v) = parse_override(key, raw)? {
            self.hooks.circuit_breaker.failure_threshold = v;
        }
        let (key, raw) = get(ENV_BREAKER_RESET_MS);
        if let Some(v) = parse_override(key, raw)? {
            self.hooks.circuit_breaker.reset_timeout_ms = v;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let thresholds = self
            .consensus
            .default_threshold
            .iter()
            .chain(self.consensus.category_thresholds.values());
        for t in thresholds {
            if !(0.0..=1.0).contains(t) {
                return Err(format!("consensus threshold {t} must be within [0, 1]"));
            }
        }
        if self.dispatch.agent_timeout_ms == 0 {
            return Err("dispatch.agent_timeout_ms must be positive".to_string());
        }
        if !(1..=MAX_SELECTED_AGENTS).contains(&self.dispatch.max_agents) {
            return Err(format!(
                "dispatch.max_agents must be between 1 and {MAX_SELECTED_AGENTS}"
            ));
        }
        if self.notifications.capacity == 0 {
            return Err("notifications.capacity must be at least 1".to_string());
        }
        self.hooks.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatch.agent_timeout(), Duration::from_millis(200));
        assert_eq!(config.hooks.max_concurrent_hooks, 8);
        assert_eq!(
            config.hooks.budgets.budget_for(HookPriority::Critical),
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_partial_toml() {
        let config = CoordinationConfig::from_toml_str(
            r#"
            [consensus.category_thresholds]
            review = 0.9

            [hooks.cache]
            capacity = 10

            [hooks.circuit_breaker]
            failure_threshold = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.hooks.cache.capacity, 10);
        assert_eq!(config.hooks.cache.ttl_ms, 60_000);
        assert_eq!(config.hooks.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.consensus.threshold_for(RequestCategory::Review), 0.9);
        assert_eq!(config.consensus.threshold_for(RequestCategory::Debug), 0.75);
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_CONSENSUS_THRESHOLD, "0.5"),
            (ENV_MAX_CONCURRENT_HOOKS, "3"),
            (ENV_BREAKER_RESET_MS, "100"),
        ]);
        let mut config = CoordinationConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.consensus.threshold_for(RequestCategory::Review), 0.5);
        assert_eq!(config.hooks.max_concurrent_hooks, 3);
        assert_eq!(config.hooks.circuit_breaker.reset_timeout_ms, 100);
    }

    #[test]
    fn test_bad_override_is_an_error() {
        let mut config = CoordinationConfig::default();
        let err = config
            .apply_overrides(|k| (k == ENV_CACHE_CAPACITY).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains(ENV_CACHE_CAPACITY));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = CoordinationConfig::default();
        config.dispatch.max_agents = 9;
        assert!(config.validate().is_err());

        let mut config = CoordinationConfig::default();
        config.consensus.default_threshold = Some(1.5);
        assert!(config.validate().is_err());
    }
}
