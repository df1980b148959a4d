use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    codec::parse_address,
    registry::{ChainDescriptor, ChainRegistry},
    Error,
};

pub const ADAPTER_EVM_RPC: &str = "evm_rpc";
pub const ADAPTER_DRY_RUN: &str = "dry_run";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BitcoinConfig {
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
    /// Sent as `x-api-key` for hosted gateways.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_rpc_retries")]
    pub max_retries: u32,
    #[serde(default = "default_rpc_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ScannerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_mempool_scan_limit")]
    pub mempool_scan_limit: usize,
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            mempool_scan_limit: default_mempool_scan_limit(),
            cache_size: default_cache_size(),
        }
    }
}

/// Durations are in seconds.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RelayerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
    /// First height to relay; defaults to the confirmed tip at startup.
    #[serde(default)]
    pub start_height: Option<u64>,
    #[serde(default = "default_relay_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff: u64,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            confirmation_blocks: default_confirmation_blocks(),
            start_height: None,
            max_retries: default_relay_retries(),
            retry_delay: default_retry_delay(),
            error_backoff: default_error_backoff(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    #[serde(default = "default_adapter_type")]
    pub adapter_type: String,
    /// Node-managed account that sends destination transactions.
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            adapter_type: default_adapter_type(),
            from_address: None,
            gas_limit: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub bitcoin: BitcoinConfig,
    #[serde(default)]
    pub chains: Vec<ChainDescriptor>,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub destination: DestinationConfig,
}

fn default_rpc_retries() -> u32 {
    3
}

fn default_rpc_retry_delay_ms() -> u64 {
    2000
}

fn default_batch_size() -> usize {
    3
}

fn default_batch_delay_ms() -> u64 {
    1000
}

fn default_mempool_scan_limit() -> usize {
    100
}

fn default_cache_size() -> usize {
    100
}

fn default_poll_interval() -> u64 {
    60
}

fn default_confirmation_blocks() -> u64 {
    1
}

fn default_relay_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

fn default_error_backoff() -> u64 {
    10
}

fn default_adapter_type() -> String {
    ADAPTER_DRY_RUN.to_string()
}

impl Config {
    /// Loads JSON, or TOML when the file ends in `.toml`.
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let is_toml = path.extension().and_then(|ext| ext.to_str()) == Some("toml");
        let config = if is_toml {
            Self::from_toml_str(&config_str)?
        } else {
            Self::from_json_str(&config_str)?
        };

        config.validate()?;

        Ok(config)
    }

    pub fn from_json_str(input: &str) -> Result<Self, Error> {
        serde_json::from_str(input).map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn from_toml_str(input: &str) -> Result<Self, Error> {
        toml::from_str(input).map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.bitcoin.rpc_url.trim().is_empty() {
            return Err(Error::Config("Bitcoin RPC URL must not be empty".to_string()));
        }

        match self.destination.adapter_type.as_str() {
            ADAPTER_EVM_RPC => {
                let from = self.destination.from_address.as_deref().ok_or_else(|| {
                    Error::Config("evm_rpc destination requires destination.from_address".to_string())
                })?;
                parse_address(from)
                    .map_err(|_| Error::Config(format!("Invalid destination from_address: {}", from)))?;
            }
            ADAPTER_DRY_RUN => {}
            other => return Err(Error::Config(format!("Invalid adapter type: {}", other))),
        }

        let mut names = HashSet::new();
        let mut selectors = HashSet::new();
        for chain in &self.chains {
            if !names.insert(chain.name.to_uppercase()) {
                return Err(Error::Config(format!("Duplicate chain name: {}", chain.name)));
            }
            if !selectors.insert(chain.chain_selector) {
                return Err(Error::Config(format!("Duplicate chain selector: {}", chain.chain_selector)));
            }
        }
        // a configured selector may still collide with a different built-in chain
        self.registry()?;

        if self.relayer.poll_interval == 0 {
            return Err(Error::Config("Relayer poll interval must be greater than 0".to_string()));
        }
        if self.relayer.max_retries == 0 {
            return Err(Error::Config("Relayer max retries must be greater than 0".to_string()));
        }
        if self.scanner.batch_size == 0 {
            return Err(Error::Config("Scanner batch size must be greater than 0".to_string()));
        }

        Ok(())
    }

    /// Built-in chains plus the configured ones.
    pub fn registry(&self) -> Result<ChainRegistry, Error> {
        ChainRegistry::with_overrides(self.chains.iter().cloned())
    }
}
