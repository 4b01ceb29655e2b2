//! Currency-keyed dispatch to chain adapters.
//!
//! The registry is built once at startup. Every call is bounded by the
//! configured chain timeout; a call that runs out of time is reported as
//! [`VerifyErrorKind::ChainUnreachable`] like any other transport failure.

use crate::chain::{
    AccountAdapter, CacheStats, ChainAdapter, ChainKind, EsploraSource, JsonRpcSource,
    TokenAdapter, UtxoAdapter, VerificationCache, VerificationKey, VerificationResult,
    VerifyErrorKind,
};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::model::normalize_currency;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for the transaction verifier.
#[derive(Debug, Clone)]
pub struct TransactionVerifierConfig {
    /// Per-call timeout.
    pub timeout: Duration,
    /// Cache capacity (number of final verifications).
    pub cache_capacity: usize,
}

impl Default for TransactionVerifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            cache_capacity: 10_000,
        }
    }
}

/// Dispatches verification to the adapter registered for a currency.
pub struct TransactionVerifier {
    adapters: HashMap<String, Arc<dyn ChainAdapter>>,
    cache: VerificationCache,
    config: TransactionVerifierConfig,
}

impl TransactionVerifier {
    /// Create an empty verifier.
    #[must_use]
    pub fn new(config: TransactionVerifierConfig) -> Self {
        Self {
            adapters: HashMap::new(),
            cache: VerificationCache::with_capacity(config.cache_capacity),
            config,
        }
    }

    /// Register `adapter` under its currency code, replacing any previous one.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.register(adapter);
        self
    }

    /// Register `adapter` under its currency code.
    pub fn register(&mut self, adapter: Arc<dyn ChainAdapter>) {
        let currency = normalize_currency(adapter.currency());
        info!("Registered {:?} adapter for {currency}", adapter.kind());
        self.adapters.insert(currency, adapter);
    }

    /// Build HTTP-backed adapters for every configured chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or an HTTP client
    /// cannot be created.
    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        config.validate()?;
        let timeout = Duration::from_secs(config.chain_timeout_secs);
        let mut verifier = Self::new(TransactionVerifierConfig {
            timeout,
            cache_capacity: config.verification_cache_capacity,
        });

        for chain in &config.chains {
            let currency = normalize_currency(&chain.currency);
            let adapter: Arc<dyn ChainAdapter> = match chain.kind {
                ChainKind::Utxo => Arc::new(
                    UtxoAdapter::new(currency, EsploraSource::new(&chain.rpc_url, timeout)?)
                        .with_decimals(chain.decimals())
                        .with_min_confirmations(chain.min_confirmations()),
                ),
                ChainKind::Account => Arc::new(
                    AccountAdapter::new(currency, JsonRpcSource::new(&chain.rpc_url, timeout)?)
                        .with_decimals(chain.decimals())
                        .with_min_confirmations(chain.min_confirmations()),
                ),
                ChainKind::Token => {
                    let contract = chain.token_contract.clone().ok_or_else(|| {
                        Error::Config(format!("{currency}: token chains need token_contract"))
                    })?;
                    Arc::new(
                        TokenAdapter::new(
                            currency,
                            JsonRpcSource::new(&chain.rpc_url, timeout)?,
                            contract,
                            chain.decimals(),
                        )
                        .with_min_confirmations(chain.min_confirmations()),
                    )
                }
            };
            verifier.register(adapter);
        }

        info!(
            "Transaction verifier initialized (currencies={:?}, timeout={:?})",
            verifier.currencies(),
            timeout
        );
        Ok(verifier)
    }

    /// Supported currency codes, sorted.
    #[must_use]
    pub fn currencies(&self) -> Vec<String> {
        let mut currencies: Vec<String> = self.adapters.keys().cloned().collect();
        currencies.sort();
        currencies
    }

    /// Whether an adapter is registered for `currency`.
    #[must_use]
    pub fn supports(&self, currency: &str) -> bool {
        self.adapters.contains_key(&normalize_currency(currency))
    }

    /// Verify that `tx_ref` pays `expected_address` the `expected_amount` of `currency`.
    ///
    /// Never retries. An unknown currency yields
    /// [`VerifyErrorKind::UnsupportedCurrency`].
    pub async fn verify(
        &self,
        currency: &str,
        tx_ref: &str,
        expected_address: &str,
        expected_amount: Decimal,
    ) -> VerificationResult {
        self.dispatch(currency, tx_ref, expected_address, expected_amount, true)
            .await
    }

    /// Like [`Self::verify`], but always asks the chain.
    ///
    /// The cache is refreshed with the outcome: a success replaces the cached
    /// entry, a definitive failure evicts it.
    pub async fn verify_fresh(
        &self,
        currency: &str,
        tx_ref: &str,
        expected_address: &str,
        expected_amount: Decimal,
    ) -> VerificationResult {
        self.dispatch(currency, tx_ref, expected_address, expected_amount, false)
            .await
    }

    async fn dispatch(
        &self,
        currency: &str,
        tx_ref: &str,
        expected_address: &str,
        expected_amount: Decimal,
        use_cache: bool,
    ) -> VerificationResult {
        let currency = normalize_currency(currency);
        let Some(adapter) = self.adapters.get(&currency) else {
            return VerificationResult::failure(
                VerifyErrorKind::UnsupportedCurrency,
                format!("no adapter for {currency}"),
            );
        };

        let key = VerificationKey::new(&currency, tx_ref, expected_address, expected_amount);
        if use_cache {
            if let Some(cached) = self.cache.get(&key) {
                debug!("Verification of {currency} {tx_ref} served from cache");
                return cached;
            }
        }

        let call = adapter.verify(tx_ref, expected_address, expected_amount);
        let result = match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "{currency} verification of {tx_ref} timed out after {:?}",
                    self.config.timeout
                );
                return VerificationResult::failure(
                    VerifyErrorKind::ChainUnreachable,
                    format!("{currency} node timed out after {:?}", self.config.timeout),
                );
            }
        };

        if result.verified {
            self.cache.insert(key, result.clone());
        } else if result
            .error_kind()
            .is_some_and(|kind| kind != VerifyErrorKind::ChainUnreachable)
        {
            self.cache.remove(&key);
        }
        result
    }

    /// Cache statistics.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
