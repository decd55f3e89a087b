//! Service configuration.
//!
//! One JSON document configures the metric store, alerting, sampling,
//! logging and the transaction watcher. Every field has a default.

use crate::chain::WatcherConfig;
use crate::core::{Error, Result};
use crate::monitoring::{AlertRule, LoggerConfig, SinkKind};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CHAINPULSE_CONFIG";

/// Observability service configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Points retained per metric series
    pub store_capacity: usize,
    /// Alert records retained in history
    pub alert_history_capacity: usize,
    /// Seconds between resource samples
    pub sampler_interval_secs: u64,
    /// Seconds between alert evaluations
    pub alert_interval_secs: u64,
    /// Seconds between dashboard broadcasts
    pub broadcast_interval_secs: u64,
    /// Dashboard events buffered per subscriber
    pub event_buffer: usize,
    /// Metric sink variant
    pub sink: SinkKind,
    /// Install the CPU, memory, disk and error-count rules
    pub baseline_rules: bool,
    /// Additional alert rules
    pub rules: Vec<AlertRule>,
    pub logger: LoggerConfig,
    pub watcher: WatcherConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            store_capacity: crate::monitoring::metrics::DEFAULT_CAPACITY,
            alert_history_capacity: crate::monitoring::alerts::DEFAULT_HISTORY_CAPACITY,
            sampler_interval_secs: 5,
            alert_interval_secs: 10,
            broadcast_interval_secs: 5,
            event_buffer: 256,
            sink: SinkKind::default(),
            baseline_rules: true,
            rules: Vec::new(),
            logger: LoggerConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl ObservabilityConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file named by `CHAINPULSE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn sampler_interval(&self) -> Duration {
        Duration::from_secs(self.sampler_interval_secs)
    }

    pub fn alert_interval(&self) -> Duration {
        Duration::from_secs(self.alert_interval_secs)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("store_capacity", self.store_capacity as u64),
            ("alert_history_capacity", self.alert_history_capacity as u64),
            ("sampler_interval_secs", self.sampler_interval_secs),
            ("alert_interval_secs", self.alert_interval_secs),
            ("broadcast_interval_secs", self.broadcast_interval_secs),
            ("event_buffer", self.event_buffer as u64),
        ];
        if let Some((field, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(Error::InvalidConfig(format!("{} must be positive", field)));
        }
        for rule in &self.rules {
            if rule.name.trim().is_empty() || rule.metric.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "alert rules need a name and a metric".to_string(),
                ));
            }
        }
        self.watcher.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::AlertCondition;

    #[test]
    fn test_default_is_valid() {
        let config = ObservabilityConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store_capacity, 10_000);
        assert_eq!(config.alert_interval(), Duration::from_secs(10));
        assert_eq!(config.broadcast_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ObservabilityConfig {
            broadcast_interval_secs: 0,
            ..Default::default()
        };
        match config.validate() {
            Err(Error::InvalidConfig(msg)) => assert!(msg.contains("broadcast_interval_secs")),
            other => panic!("expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_json() {
        let raw = r#"{
            "sink": "prometheus",
            "baseline_rules": false,
            "rules": [{"name": "slow", "metric": "operation.duration_seconds", "condition": ">=", "threshold": 30.0}],
            "logger": {"level": "debug", "format": "json"},
            "watcher": {"confirmation_blocks": 6}
        }"#;
        let config: ObservabilityConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.sink, SinkKind::Prometheus);
        assert!(!config.baseline_rules);
        assert_eq!(config.rules[0].condition, AlertCondition::GreaterOrEqual);
        assert!(config.rules[0].enabled);
        assert_eq!(config.watcher.confirmation_blocks, 6);
        assert_eq!(config.watcher.poll_interval_secs, 5);
        assert_eq!(config.sampler_interval_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join(format!("chainpulse-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"store_capacity": 64}"#).unwrap();
        let config = ObservabilityConfig::from_file(&path).unwrap();
        assert_eq!(config.store_capacity, 64);
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            ObservabilityConfig::from_file(&path),
            Err(Error::Io(_))
        ));
    }
}
