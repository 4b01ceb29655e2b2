//! Configuration for the settlement service.

use crate::chain::ChainKind;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on a single chain verification round-trip, in seconds.
    #[serde(default = "default_chain_timeout")]
    pub chain_timeout_secs: u64,

    /// Number of final verifications kept in the LRU cache.
    #[serde(default = "default_cache_capacity")]
    pub verification_cache_capacity: usize,

    /// Supported currencies and where to verify them.
    #[serde(default)]
    pub chains: Vec<ChainConfig>,

    /// Sanctions and AML configuration.
    #[serde(default)]
    pub compliance: ComplianceConfig,

    /// Risk scoring configuration.
    #[serde(default)]
    pub risk: RiskConfig,
}

/// One supported currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Currency code (e.g. `BTC`, `ETH`, `USDT`).
    pub currency: String,

    /// Ledger family.
    pub kind: ChainKind,

    /// Esplora base URL for UTXO chains, JSON-RPC endpoint otherwise.
    pub rpc_url: String,

    /// Merchant receiving address.
    pub payment_address: String,

    /// Display-unit exponent; defaults per kind (8 UTXO, 18 account, 6 token).
    #[serde(default)]
    pub decimals: Option<u32>,

    /// Required confirmation depth; defaults to 1 for UTXO and 0 otherwise.
    #[serde(default)]
    pub min_confirmations: Option<u64>,

    /// Token contract address (token chains only).
    #[serde(default)]
    pub token_contract: Option<String>,
}

impl ChainConfig {
    /// Effective display-unit exponent.
    #[must_use]
    pub fn decimals(&self) -> u32 {
        self.decimals.unwrap_or(match self.kind {
            ChainKind::Utxo => 8,
            ChainKind::Account => 18,
            ChainKind::Token => 6,
        })
    }

    /// Effective confirmation depth.
    #[must_use]
    pub fn min_confirmations(&self) -> u64 {
        self.min_confirmations.unwrap_or(match self.kind {
            ChainKind::Utxo => 1,
            ChainKind::Account | ChainKind::Token => 0,
        })
    }
}

/// Sanctions screening and AML thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceConfig {
    /// Fiat amount at which a currency transaction report is required.
    #[serde(default = "default_ctr_threshold")]
    pub ctr_threshold: Decimal,

    /// Fiat amount above which a large-transaction alert is raised.
    #[serde(default = "default_large_threshold")]
    pub large_transaction_threshold: Decimal,

    /// Lower bound of the just-under-threshold band used by structuring detection.
    #[serde(default = "default_structuring_floor")]
    pub structuring_floor: Decimal,

    /// Sanctioned ISO country codes.
    #[serde(default = "default_sanctioned_countries")]
    pub sanctioned_countries: Vec<String>,

    /// Sanctioned person/entity names.
    #[serde(default)]
    pub sanctioned_names: Vec<String>,

    /// Capacity of the compliance job queue.
    #[serde(default = "default_queue_depth")]
    pub worker_queue_depth: usize,

    /// Evaluation attempts per job before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff between attempts, multiplied by the attempt number.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

/// Risk scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Countries scored as high geographic risk.
    #[serde(default = "default_high_risk_countries")]
    pub high_risk_countries: Vec<String>,

    /// Countries scored as medium geographic risk.
    #[serde(default = "default_medium_risk_countries")]
    pub medium_risk_countries: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_level: default_log_level(),
            chain_timeout_secs: default_chain_timeout(),
            verification_cache_capacity: default_cache_capacity(),
            chains: Vec::new(),
            compliance: ComplianceConfig::default(),
            risk: RiskConfig::default(),
        }
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            ctr_threshold: default_ctr_threshold(),
            large_transaction_threshold: default_large_threshold(),
            structuring_floor: default_structuring_floor(),
            sanctioned_countries: default_sanctioned_countries(),
            sanctioned_names: Vec::new(),
            worker_queue_depth: default_queue_depth(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            high_risk_countries: default_high_risk_countries(),
            medium_risk_countries: default_medium_risk_countries(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8088))
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_chain_timeout() -> u64 {
    12
}

const fn default_cache_capacity() -> usize {
    10_000
}

fn default_ctr_threshold() -> Decimal {
    Decimal::from(10_000)
}

fn default_large_threshold() -> Decimal {
    Decimal::from(5_000)
}

fn default_structuring_floor() -> Decimal {
    Decimal::from(9_000)
}

fn codes(list: &[&str]) -> Vec<String> {
    list.iter().map(|c| (*c).to_string()).collect()
}

fn default_sanctioned_countries() -> Vec<String> {
    codes(&["KP", "IR", "SY", "CU"])
}

fn default_high_risk_countries() -> Vec<String> {
    codes(&["KP", "IR", "SY", "CU", "MM", "AF"])
}

fn default_medium_risk_countries() -> Vec<String> {
    codes(&["RU", "VE", "NG", "PK", "YE", "LB", "HT"])
}

const fn default_queue_depth() -> usize {
    1024
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_retry_backoff() -> u64 {
    500
}

/// Default location of the configuration file.
#[must_use]
pub fn default_config_path() -> PathBuf {
    directories::ProjectDirs::from("", "", "cryptopay")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("cryptopay.toml"))
}

impl ServiceConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn to_file(&self, path: &std::path::Path) -> crate::Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| crate::Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violation found.
    pub fn validate(&self) -> crate::Result<()> {
        let mut seen = HashSet::new();
        for chain in &self.chains {
            let currency = crate::model::normalize_currency(&chain.currency);
            if currency.is_empty() {
                return Err(crate::Error::Config("chain with empty currency".into()));
            }
            if !seen.insert(currency.clone()) {
                return Err(crate::Error::Config(format!(
                    "currency {currency} configured twice"
                )));
            }
            if chain.payment_address.trim().is_empty() {
                return Err(crate::Error::Config(format!(
                    "{currency}: payment_address is empty"
                )));
            }
            if chain.kind == ChainKind::Token && chain.token_contract.is_none() {
                return Err(crate::Error::Config(format!(
                    "{currency}: token chains need token_contract"
                )));
            }
            if chain.decimals() > 28 {
                return Err(crate::Error::Config(format!(
                    "{currency}: at most 28 decimals are supported"
                )));
            }
        }
        if self.chain_timeout_secs == 0 {
            return Err(crate::Error::Config("chain_timeout_secs must be > 0".into()));
        }
        if self.compliance.structuring_floor >= self.compliance.ctr_threshold {
            return Err(crate::Error::Config(
                "structuring_floor must be below ctr_threshold".into(),
            ));
        }
        Ok(())
    }

    /// Payment address configured for `currency`.
    #[must_use]
    pub fn payment_address(&self, currency: &str) -> Option<&str> {
        let currency = crate::model::normalize_currency(currency);
        self.chains
            .iter()
            .find(|c| crate::model::normalize_currency(&c.currency) == currency)
            .map(|c| c.payment_address.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        listen_addr = "0.0.0.0:9000"

        [[chains]]
        currency = "BTC"
        kind = "utxo"
        rpc_url = "https://blockstream.info/api"
        payment_address = "bc1qmerchant"

        [[chains]]
        currency = "USDT"
        kind = "token"
        rpc_url = "https://eth.example/rpc"
        payment_address = "0xmerchant"
        token_contract = "0xdAC17F958D2ee523a2206206994597C13D831ec7"

        [compliance]
        sanctioned_names = ["Ivan Sanctioned"]
    "#;

    #[test]
    fn test_parse_with_defaults() {
        let config = ServiceConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.chains.len(), 2);
        assert_eq!(config.chains[0].decimals(), 8);
        assert_eq!(config.chains[0].min_confirmations(), 1);
        assert_eq!(config.chains[1].decimals(), 6);
        assert_eq!(config.chain_timeout_secs, 12);
        assert_eq!(config.compliance.ctr_threshold, Decimal::from(10_000));
        assert!(config.compliance.sanctioned_countries.contains(&"IR".to_string()));
        assert_eq!(config.payment_address("btc"), Some("bc1qmerchant"));
    }

    #[test]
    fn test_token_without_contract_rejected() {
        let mut config = ServiceConfig::from_toml(SAMPLE).unwrap();
        config.chains[1].token_contract = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_currency_rejected() {
        let mut config = ServiceConfig::from_toml(SAMPLE).unwrap();
        let mut dup = config.chains[0].clone();
        dup.currency = "btc".into();
        config.chains.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = ServiceConfig::from_toml(SAMPLE).unwrap();
        config.to_file(&path).unwrap();
        let loaded = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.chains.len(), 2);
        assert_eq!(loaded.listen_addr, config.listen_addr);
    }
}
