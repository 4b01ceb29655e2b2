//! Adapter for native-coin payments on account chains.

use super::source::AccountSource;
use super::{
    evaluate_transfer, from_base_units, AddressMatch, ChainAdapter, ChainKind, ObservedTransfer,
    VerificationResult, VerifyErrorKind,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Wei per ether, as a decimal exponent.
const DEFAULT_DECIMALS: u32 = 18;

/// Verifies native-value transfers using the transaction and its receipt.
pub struct AccountAdapter<S> {
    currency: String,
    source: S,
    decimals: u32,
    min_confirmations: u64,
}

impl<S: AccountSource> AccountAdapter<S> {
    /// Create an adapter for `currency` reading from `source`.
    pub fn new(currency: impl Into<String>, source: S) -> Self {
        Self {
            currency: currency.into(),
            source,
            decimals: DEFAULT_DECIMALS,
            min_confirmations: 0,
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
impl<S: AccountSource> ChainAdapter for AccountAdapter<S> {
    fn kind(&self) -> ChainKind {
        ChainKind::Account
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

        let receipt = match self.source.receipt(tx_ref).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                return VerificationResult::failure(
                    VerifyErrorKind::Unconfirmed,
                    format!("{tx_ref} is not mined yet"),
                )
            }
            Err(e) => {
                warn!("{} receipt for {tx_ref} failed: {e}", self.currency);
                return VerificationResult::failure(VerifyErrorKind::ChainUnreachable, e.to_string());
            }
        };

        if !receipt.success {
            return VerificationResult::failure(
                VerifyErrorKind::TransactionFailed,
                format!("{tx_ref} reverted in block {}", receipt.block_number),
            );
        }

        let Some(to) = tx.to else {
            return VerificationResult::failure(
                VerifyErrorKind::AddressMismatch,
                format!("{tx_ref} is a contract creation"),
            );
        };

        let amount = match from_base_units(tx.value, self.decimals) {
            Ok(amount) => amount,
            Err(e) => return VerificationResult::failure(VerifyErrorKind::AmountMismatch, e.to_string()),
        };

        let current = match self.source.block_number().await {
            Ok(height) => height,
            Err(e) => {
                warn!("{} block number lookup failed: {e}", self.currency);
                return VerificationResult::failure(VerifyErrorKind::ChainUnreachable, e.to_string());
            }
        };
        let confirmations = current.saturating_sub(receipt.block_number);

        debug!(
            "{} tx {tx_ref}: {amount} to {to}, {confirmations} confirmations",
            self.currency
        );

        evaluate_transfer(
            ObservedTransfer {
                to_address: to,
                from_address: Some(tx.from),
                amount,
                confirmations,
                block_reference: receipt
                    .block_hash
                    .or_else(|| Some(receipt.block_number.to_string())),
            },
            expected_address,
            expected_amount,
            AddressMatch::CaseInsensitive,
            self.min_confirmations,
        )
    }
}
