//! Transaction watcher configuration.

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One chain the watcher can poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// EIP-155 chain id
    pub chain_id: u64,
    /// Whether a client is created for this network
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Per-request timeout
    #[serde(default = "timeout_default")]
    pub request_timeout_secs: u64,
}

fn enabled_default() -> bool {
    true
}

fn timeout_default() -> u64 {
    10
}

impl NetworkConfig {
    /// Create an enabled network.
    pub fn new(rpc_url: &str, chain_id: u64) -> Self {
        Self {
            rpc_url: rpc_url.to_string(),
            chain_id,
            enabled: true,
            request_timeout_secs: timeout_default(),
        }
    }

    /// Mark the network disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Transaction watcher configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Seconds between polling ticks
    pub poll_interval_secs: u64,
    /// Confirmations after which a transaction is retired
    pub confirmation_blocks: u64,
    /// Terminal records kept for inspection
    pub retain_terminal: usize,
    /// Networks by name
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(
            "hyperion".to_string(),
            NetworkConfig::new("https://hyperion-testnet.metisdevops.link", 133717),
        );
        networks.insert(
            "metis".to_string(),
            NetworkConfig::new("https://andromeda.metis.io/?owner=1088", 1088).disabled(),
        );
        Self {
            poll_interval_secs: 5,
            confirmation_blocks: 12,
            retain_terminal: 1_000,
            networks,
        }
    }
}

impl WatcherConfig {
    /// Polling period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Names of enabled networks.
    pub fn enabled_networks(&self) -> Vec<&str> {
        self.networks
            .iter()
            .filter(|(_, n)| n.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::InvalidConfig("watcher poll interval must be positive".into()));
        }
        if self.confirmation_blocks == 0 {
            return Err(Error::InvalidConfig("confirmation_blocks must be positive".into()));
        }
        for (name, network) in &self.networks {
            if network.enabled && network.rpc_url.trim().is_empty() {
                return Err(Error::InvalidConfig(format!("network {} has no rpc_url", name)));
            }
            if network.request_timeout_secs == 0 {
                return Err(Error::InvalidConfig(format!(
                    "network {} request timeout must be positive",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WatcherConfig::default();
        assert_eq!(config.confirmation_blocks, 12);
        assert_eq!(config.enabled_networks(), vec!["hyperion"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_url() {
        let mut config = WatcherConfig::default();
        config.networks.insert("local".into(), NetworkConfig::new("", 31337));
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WatcherConfig =
            serde_json::from_str(r#"{"confirmation_blocks": 3, "networks": {"local": {"rpc_url": "http://localhost:8545", "chain_id": 31337}}}"#)
                .unwrap();
        assert_eq!(config.confirmation_blocks, 3);
        assert_eq!(config.poll_interval_secs, 5);
        assert!(config.networks["local"].enabled);
        assert_eq!(config.networks["local"].request_timeout_secs, 10);
    }
}
