//! Configuration management with validation and defaults
//!
//! Centralized configuration for withdrawal policy, settlement network
//! selection, and storage tuning.

use serde::{Deserialize, Serialize};

/// Balances and amounts are integer minor units: 1 coin = 10_000 units.
pub const UNITS_PER_COIN: u64 = 10_000;

/// Top-level cashier configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CashierConfig {
    #[serde(default)]
    pub withdrawal: WithdrawalConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Withdrawal policy values
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalConfig {
    /// Smallest accepted withdrawal amount, in minor units
    pub min_withdrawal: u64,
    /// Fixed fee charged on every withdrawal, in minor units
    pub withdrawal_fee: u64,
    /// Amounts at or above this require manual approval; 0 disables the gate
    pub approval_threshold: u64,
    /// Maximum internal resubmissions after a retryable settlement fault
    pub max_retry_attempts: u32,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            min_withdrawal: 100,
            withdrawal_fee: 1,
            approval_threshold: 0,
            max_retry_attempts: 3,
        }
    }
}

/// Settlement network selection
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network: address checksums are verified through the node
    Mainnet,
    /// Test network: local format validation only
    Testnet,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Mainnet => write!(f, "mainnet"),
            Network::Testnet => write!(f, "testnet"),
        }
    }
}

/// Settlement node configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub network: Network,
    /// House (source) wallet address per network
    pub mainnet_house_wallet: String,
    pub testnet_house_wallet: String,
    /// Per-call timeout against the settlement node, milliseconds
    pub node_timeout_ms: u64,
}

impl SettlementConfig {
    /// House wallet for the given network
    pub fn house_wallet(&self, network: Network) -> &str {
        match network {
            Network::Mainnet => &self.mainnet_house_wallet,
            Network::Testnet => &self.testnet_house_wallet,
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            network: Network::Testnet,
            mainnet_house_wallet: String::new(),
            testnet_house_wallet: "tw1qhouse00000000000000000000000000".to_string(),
            node_timeout_ms: 10_000,
        }
    }
}

/// Storage configuration with optimization settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: String,
    pub write_buffer_size_mb: usize,
    pub max_write_buffer_number: usize,
    pub target_file_size_mb: usize,
    /// Whether to clear the database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/cashier_data".to_string(),
            write_buffer_size_mb: 128,
            max_write_buffer_number: 4,
            target_file_size_mb: 128,
            clear_on_start: false,
        }
    }
}

/// Configuration validation and factory methods
impl CashierConfig {
    /// Production deployment: mainnet settlement, approvals on large amounts
    pub fn production(house_wallet: String) -> Self {
        Self {
            withdrawal: WithdrawalConfig {
                min_withdrawal: 100,
                withdrawal_fee: 1,
                approval_threshold: 100 * UNITS_PER_COIN,
                max_retry_attempts: 3,
            },
            settlement: SettlementConfig {
                network: Network::Mainnet,
                mainnet_house_wallet: house_wallet,
                ..Default::default()
            },
            storage: StorageConfig::default(),
        }
    }

    /// Testnet deployment with a throwaway database
    pub fn testnet() -> Self {
        Self {
            storage: StorageConfig {
                data_directory: "./DB/cashier_testnet".to_string(),
                clear_on_start: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.withdrawal.min_withdrawal == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "min_withdrawal must be > 0".to_string(),
            ));
        }

        if self.withdrawal.approval_threshold != 0
            && self.withdrawal.approval_threshold < self.withdrawal.min_withdrawal
        {
            return Err(ConfigValidationError::LogicalInconsistency(
                "approval_threshold below min_withdrawal would gate every request".to_string(),
            ));
        }

        if self.withdrawal.max_retry_attempts > 10 {
            return Err(ConfigValidationError::InvalidValue(
                "max_retry_attempts above 10 would escalate fees past any sane bound".to_string(),
            ));
        }

        if self
            .settlement
            .house_wallet(self.settlement.network)
            .is_empty()
        {
            return Err(ConfigValidationError::MissingRequired(format!(
                "house wallet address for {}",
                self.settlement.network
            )));
        }

        if self.storage.data_directory.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "storage.data_directory".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    InvalidValue(String),
    LogicalInconsistency(String),
    MissingRequired(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValidationError::InvalidValue(msg) => {
                write!(f, "Invalid configuration value: {}", msg)
            }
            ConfigValidationError::LogicalInconsistency(msg) => {
                write!(f, "Configuration logical inconsistency: {}", msg)
            }
            ConfigValidationError::MissingRequired(msg) => {
                write!(f, "Missing required configuration: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CashierConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testnet_config_is_valid() {
        let config = CashierConfig::testnet();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_production_requires_house_wallet() {
        let config = CashierConfig::production(String::new());
        assert!(config.validate().is_err());

        let config = CashierConfig::production("mw1qhouse".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_below_minimum_rejected() {
        let mut config = CashierConfig::default();
        config.withdrawal.min_withdrawal = 500;
        config.withdrawal.approval_threshold = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_house_wallet_lookup_per_network() {
        let config = SettlementConfig {
            network: Network::Mainnet,
            mainnet_house_wallet: "mw1qmain".to_string(),
            testnet_house_wallet: "tw1qtest".to_string(),
            node_timeout_ms: 1_000,
        };
        assert_eq!(config.house_wallet(Network::Mainnet), "mw1qmain");
        assert_eq!(config.house_wallet(Network::Testnet), "tw1qtest");
    }
}
