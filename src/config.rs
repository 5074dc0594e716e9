//! Configuration management for the flow engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub wallet: WalletConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Retry budget for a single transaction submission
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Upper bound on a single RPC submission attempt
    pub send_timeout_secs: u64,
    /// Default for flows that do not specify it per step
    pub wait_for_confirmation: bool,
    /// A watched transaction still unconfirmed after this is marked failed
    pub confirmation_timeout_secs: u64,
    /// Receipt polling cadence for the watcher and blocking confirmations
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub keystore_path: Option<String>,
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub confirmation_blocks: u64,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
    Arbitrum,
    Optimism,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("TXFLOW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &PathBuf) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        // At least one chain must be enabled
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        // Validate chain configurations
        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
        }

        if self.engine.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be non-zero");
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    fn sample_config() -> &'static str {
        r#"
[engine]
max_retries = 3
retry_delay_ms = 500
send_timeout_secs = 30
wait_for_confirmation = true
confirmation_timeout_secs = 600
poll_interval_ms = 2000

[wallet]
private_key_env = "TXFLOW_PRIVATE_KEY"

[metrics]
enabled = false

[chains.mainnet]
chain_id = 1
name = "Ethereum"
rpc_urls = ["https://rpc.example.com"]
confirmation_blocks = 32
gas_price_strategy = "eip1559"
max_gas_price_gwei = 500
enabled = true

[chains.base]
chain_id = 8453
name = "Base"
rpc_urls = []
confirmation_blocks = 64
gas_price_strategy = "optimism"
max_gas_price_gwei = 100
enabled = false
"#
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_config().as_bytes()).unwrap();

        let settings = Settings::load_from(&file.path().to_path_buf()).unwrap();
        assert_eq!(settings.enabled_chains().len(), 1);
        assert_eq!(settings.get_chain_by_id(1).unwrap().name, "Ethereum");
        assert!(settings.get_chain_by_id(8453).is_some());
        assert!(settings.get_chain_by_id(42).is_none());
        assert_eq!(
            settings.chains["mainnet"].gas_price_strategy,
            GasPriceStrategy::Eip1559
        );
    }

    #[test]
    fn test_disabled_chain_with_no_rpc_is_valid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sample_config().as_bytes()).unwrap();

        // base has no RPC urls but is disabled, so validation passes
        assert!(Settings::load_from(&file.path().to_path_buf()).is_ok());
    }

    #[test]
    fn test_all_chains_disabled_is_rejected() {
        let config = sample_config().replace("enabled = true", "enabled = false");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.as_bytes()).unwrap();

        assert!(Settings::load_from(&file.path().to_path_buf()).is_err());
    }
}
