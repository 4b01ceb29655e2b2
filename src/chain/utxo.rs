//! Adapter for UTXO chains.

use super::source::UtxoSource;
use super::{
    evaluate_transfer, from_base_units, AddressMatch, ChainAdapter, ChainKind, ObservedTransfer,
    VerificationResult, VerifyErrorKind,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Satoshis per coin, as a decimal exponent.
const DEFAULT_DECIMALS: u32 = 8;

/// Verifies payments on a UTXO chain by scanning transaction outputs.
pub struct UtxoAdapter<S> {
    currency: String,
    source: S,
    decimals: u32,
    min_confirmations: u64,
}

impl<S: UtxoSource> UtxoAdapter<S> {
    /// Create an adapter for `currency` reading from `source`.
    pub fn new(currency: impl Into<String>, source: S) -> Self {
        Self {
            currency: currency.into(),
            source,
            decimals: DEFAULT_DECIMALS,
            min_confirmations: 1,
        }
    }

    /// Override the display-unit exponent.
    #[must_use]
    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    /// Override the required confirmation depth.
    #[must_use]
    pub fn with_min_confirmations(mut self, min_confirmations: u64) -> Self {
        self.min_confirmations = min_confirmations;
        self
    }
}

#[async_trait]
impl<S: UtxoSource> ChainAdapter for UtxoAdapter<S> {
    fn kind(&self) -> ChainKind {
        ChainKind::Utxo
    }

    fn currency(&self) -> &str {
        &self.currency
    }

    fn min_confirmations(&self) -> u64 {
        self.min_confirmations
    }

    async fn verify(
        &self,
        tx_ref: &str,
        expected_address: &str,
        expected_amount: Decimal,
    ) -> VerificationResult {
        let tx = match self.source.transaction(tx_ref).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                return VerificationResult::failure(
                    VerifyErrorKind::NotFound,
                    format!("{} transaction {tx_ref} not found", self.currency),
                )
            }
            Err(e) => {
                warn!("{} lookup for {tx_ref} failed: {e}", self.currency);
                return VerificationResult::failure(VerifyErrorKind::ChainUnreachable, e.to_string());
            }
        };

        // Several outputs to the same address count as one payment.
        let paid: u128 = tx
            .outputs
            .iter()
            .filter(|o| {
                o.address
                    .as_deref()
                    .is_some_and(|a| AddressMatch::Exact.matches(expected_address, a))
            })
            .map(|o| u128::from(o.value))
            .sum();

        let has_output = tx.outputs.iter().any(|o| {
            o.address
                .as_deref()
                .is_some_and(|a| AddressMatch::Exact.matches(expected_address, a))
        });
        if !has_output {
            let mut result = VerificationResult::failure(
                VerifyErrorKind::AddressMismatch,
                format!("no output of {tx_ref} pays {expected_address}"),
            );
            result.from_address = tx.sender;
            return result;
        }

        let amount = match from_base_units(paid, self.decimals) {
            Ok(amount) => amount,
            Err(e) => return VerificationResult::failure(VerifyErrorKind::AmountMismatch, e.to_string()),
        };

        let confirmations = match tx.block_height {
            Some(height) => match self.source.tip_height().await {
                Ok(tip) => (tip + 1).saturating_sub(height),
                Err(e) => {
                    warn!("{} tip height lookup failed: {e}", self.currency);
                    return VerificationResult::failure(
                        VerifyErrorKind::ChainUnreachable,
                        e.to_string(),
                    );
                }
            },
            None => 0,
        };

        debug!(
            "{} tx {tx_ref}: {amount} to {expected_address}, {confirmations} confirmations",
            self.currency
        );

        evaluate_transfer(
            ObservedTransfer {
                to_address: expected_address.to_string(),
                from_address: tx.sender,
                amount,
                confirmations,
                block_reference: tx
                    .block_hash
                    .or_else(|| tx.block_height.map(|h| h.to_string())),
            },
            expected_address,
            expected_amount,
            AddressMatch::Exact,
            self.min_confirmations,
        )
    }
}
