use crate::classifier::StatusThresholds;
use crate::coordination::ShutdownConfig;
use crate::domain::{Endpoint, EndpointKey};
use crate::healing::{FallbackChainConfig, HealingConfig};
use crate::learning::LearningConfig;
use crate::monitor::MonitorConfig;
use crate::persistence::CacheConfig;
use crate::supervisor::{AlertManagerConfig, EscalationConfig};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub classifier: StatusThresholds,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub alerts: AlertManagerConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fallback: Vec<FallbackChainConfig>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Status probe server port (disabled when unset)
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("VIGIL_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (VIGIL__ALERTS__COOLDOWN_SECS, etc.)
            .add_source(
                Environment::with_prefix("VIGIL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.monitor.pool_size == 0 {
            errors.push("monitor.pool_size must be positive".to_string());
        }

        let t = &self.classifier;
        if t.window_size == 0 {
            errors.push("classifier.window_size must be positive".to_string());
        }
        if !(0.0 < t.degraded_rate && t.degraded_rate <= t.critical_rate && t.critical_rate <= t.failed_rate && t.failed_rate <= 1.0)
        {
            errors.push(
                "classifier rates must satisfy 0 < degraded <= critical <= failed <= 1".to_string(),
            );
        }
        if t.critical_consecutive > t.failed_consecutive {
            errors.push(
                "classifier.critical_consecutive must not exceed failed_consecutive".to_string(),
            );
        }

        if self.healing.max_attempts == 0 {
            errors.push("healing.max_attempts must be positive".to_string());
        }
        if self.healing.backoff.multiplier < 1.0 {
            errors.push("healing.backoff.multiplier must be >= 1.0".to_string());
        }
        if self.healing.backoff.base_delay_ms > self.healing.backoff.max_delay_ms {
            errors.push("healing.backoff.base_delay_ms must not exceed max_delay_ms".to_string());
        }

        if self.learning.min_samples == 0 {
            errors.push("learning.min_samples must be positive".to_string());
        }
        if !(0.0 < self.learning.ema_alpha && self.learning.ema_alpha <= 1.0) {
            errors.push("learning.ema_alpha must be in (0, 1]".to_string());
        }

        if self.alerts.escalation_threshold == 0 {
            errors.push("alerts.escalation_threshold must be positive".to_string());
        }

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            let key = EndpointKey::new(&endpoint.source_id, &endpoint.endpoint_path);
            if !seen.insert(key.clone()) {
                errors.push(format!("duplicate endpoint {}", key));
            }
            if url::Url::parse(&endpoint.url).is_err() {
                errors.push(format!("endpoint {} has invalid url {}", key, endpoint.url));
            }
        }

        let mut primaries = HashSet::new();
        for chain in &self.fallback {
            if !primaries.insert(chain.primary.clone()) {
                errors.push(format!("duplicate fallback chain for {}", chain.primary));
            }
            if chain.alternates.contains(&chain.primary) {
                errors.push(format!(
                    "fallback chain for {} lists itself as an alternate",
                    chain.primary
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.healing.max_attempts, 3);
        assert_eq!(config.learning.min_samples, 10);
        assert_eq!(config.alerts.escalation_threshold, 5);
        assert_eq!(config.alerts.cooldown_secs, 60);
    }

    #[test]
    fn test_validate_rejects_duplicates_and_self_fallback() {
        let mut config = AppConfig::default();
        let endpoint = Endpoint::new("alpha", "/quote", "https://alpha.example.com/quote");
        config.endpoints = vec![endpoint.clone(), endpoint];
        config.fallback = vec![FallbackChainConfig {
            primary: "alpha".to_string(),
            alternates: vec!["beta".to_string(), "alpha".to_string()],
        }];

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate endpoint")));
        assert!(errors.iter().any(|e| e.contains("lists itself")));
    }

    #[test]
    fn test_validate_rejects_unordered_thresholds() {
        let mut config = AppConfig::default();
        config.classifier.degraded_rate = 0.3;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("classifier rates")));
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let config = AppConfig::load_from("/nonexistent-vigil-config").unwrap();
        assert_eq!(config.logging.level, "info");
        assert!(config.endpoints.is_empty());
    }
}
