//! Configuration management for the wallet core
//!
//! Loads configuration from a TOML file with environment variable substitution,
//! then applies `WALLET__SECTION__KEY` environment overrides.

use crate::error::{WalletError, WalletResult};

use ethers::types::{Address, U256};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub wallet: WalletConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub gas: GasConfig,
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    /// Exchange network contract answering `getExpectedRate`
    pub network_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    pub feed_url: String,
    pub refresh_interval_secs: u64,
    pub default_gwei: u64,
    pub low_gwei: u64,
    pub max_gwei: u64,
    pub transfer_eth_gas_limit: u64,
    pub transfer_token_gas_limit: u64,
    pub swap_gas_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    pub poll_interval_secs: u64,
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: i64,
    pub history_url: Option<String>,
    #[serde(default = "default_history_interval")]
    pub history_interval_secs: u64,
    #[serde(default = "default_history_rewind")]
    pub history_rewind_blocks: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_grace_period() -> i64 {
    60
}

fn default_history_interval() -> u64 {
    10
}

fn default_history_rewind() -> u64 {
    2000
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            feed_url: "https://tracker.kyber.network/api/gasPrice".to_string(),
            refresh_interval_secs: 10,
            default_gwei: 10,
            low_gwei: 5,
            max_gwei: 20,
            transfer_eth_gas_limit: 21_000,
            transfer_token_gas_limit: 60_000,
            swap_gas_limit: 660_000,
        }
    }
}

impl GasConfig {
    pub fn default_price(&self) -> U256 {
        gwei(self.default_gwei)
    }

    pub fn low_price(&self) -> U256 {
        gwei(self.low_gwei)
    }

    pub fn max_price(&self) -> U256 {
        gwei(self.max_gwei)
    }
}

/// Convert a whole gwei amount into wei
pub fn gwei(amount: u64) -> U256 {
    U256::from(amount) * U256::exp10(9)
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> WalletResult<Self> {
        let config_path = env::var("WALLET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path).map_err(|e| {
            WalletError::Config(format!("Failed to read config file {:?}: {}", config_path, e))
        })?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text, applying substitutions and env overrides
    pub fn from_toml(raw: &str) -> WalletResult<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(&config_str, config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("WALLET")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| WalletError::Config(format!("Failed to parse configuration: {}", e)))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> WalletResult<()> {
        if self.chain.rpc_urls.is_empty() {
            return Err(WalletError::Config(format!(
                "Chain {} has no RPC URLs configured",
                self.chain.chain_id
            )));
        }

        self.wallet_address()?;
        self.network_address()?;

        if self.gas.refresh_interval_secs == 0 || self.tracker.poll_interval_secs == 0 {
            return Err(WalletError::Config(
                "Refresh and poll intervals must be non-zero".to_string(),
            ));
        }

        if !(self.gas.low_gwei <= self.gas.default_gwei && self.gas.default_gwei <= self.gas.max_gwei) {
            return Err(WalletError::Config(format!(
                "Gas defaults must satisfy low <= default <= max (got {} / {} / {})",
                self.gas.low_gwei, self.gas.default_gwei, self.gas.max_gwei
            )));
        }

        if self.tracker.history_url.is_none() {
            tracing::warn!("No history indexer configured - history sync disabled");
        }

        Ok(())
    }

    pub fn wallet_address(&self) -> WalletResult<Address> {
        parse_address("wallet.address", &self.wallet.address)
    }

    pub fn network_address(&self) -> WalletResult<Address> {
        parse_address("chain.network_address", &self.chain.network_address)
    }
}

fn parse_address(field: &str, value: &str) -> WalletResult<Address> {
    value
        .parse::<Address>()
        .map_err(|e| WalletError::Config(format!("Invalid address for {}: {} ({})", field, value, e)))
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
            .expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
