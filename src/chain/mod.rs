//! On-chain payment verification.
//!
//! Each supported ledger family has one [`ChainAdapter`] that reads public
//! chain state for a transaction reference and normalizes it into a
//! [`VerificationResult`]:
//!
//! ```text
//!   tx reference
//!        │
//!        ▼
//! ┌──────────────┐   outputs / receipt / event log
//! │ ChainAdapter │ ───────────────────────────────► data source (HTTP)
//! └──────┬───────┘
//!        │ address check (exact or case-insensitive)
//!        │ amount check (relative tolerance)
//!        │ confirmation check
//!        ▼
//! VerificationResult
//! ```
//!
//! Adapters never retry. A data source that cannot be reached yields
//! [`VerifyErrorKind::ChainUnreachable`] and the caller decides what to do.

mod account;
mod cache;
mod http;
mod source;
mod token;
mod utxo;

pub use account::AccountAdapter;
pub use cache::{CacheStats, VerificationCache, VerificationKey};
pub use http::{EsploraSource, JsonRpcSource};
pub use source::{
    AccountSource, AccountTransaction, LogEntry, Receipt, UtxoOutput, UtxoSource, UtxoTransaction,
};
pub use token::{decode_transfer, TokenAdapter, TokenTransfer, TRANSFER_EVENT_TOPIC};
pub use utxo::UtxoAdapter;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Maximum relative difference between claimed and expected amounts (0.01%).
pub const AMOUNT_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

/// Ledger family a currency settles on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Unspent-output ledger (Bitcoin-style).
    Utxo,
    /// Account/receipt ledger (Ethereum-style native coin).
    Account,
    /// Token contract on an account ledger.
    Token,
}

/// Why a verification did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyErrorKind {
    /// The chain does not know the transaction.
    NotFound,
    /// Known but below the required confirmation depth.
    Unconfirmed,
    /// Paid amount outside tolerance.
    AmountMismatch,
    /// Transaction does not pay the expected address.
    AddressMismatch,
    /// Chain node could not be reached or timed out.
    ChainUnreachable,
    /// Receipt reports execution failure.
    TransactionFailed,
    /// Token transaction targets a different contract.
    WrongContract,
    /// No adapter for the currency.
    UnsupportedCurrency,
}

impl VerifyErrorKind {
    /// The same transaction may verify on a later attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ChainUnreachable | Self::Unconfirmed)
    }

    /// Whether a failed attempt of this kind leaves an auditable Payment record.
    ///
    /// Only an unreachable node leaves nothing behind, since nothing was
    /// learned about the transaction.
    #[must_use]
    pub fn persists_failure(&self) -> bool {
        *self != Self::ChainUnreachable
    }

    /// HTTP status class.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ChainUnreachable => 503,
            Self::Unconfirmed => 425,
            _ => 400,
        }
    }

    /// Snake-case name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unconfirmed => "unconfirmed",
            Self::AmountMismatch => "amount_mismatch",
            Self::AddressMismatch => "address_mismatch",
            Self::ChainUnreachable => "chain_unreachable",
            Self::TransactionFailed => "transaction_failed",
            Self::WrongContract => "wrong_contract",
            Self::UnsupportedCurrency => "unsupported_currency",
        }
    }
}

impl std::fmt::Display for VerifyErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure detail attached to a [`VerificationResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationError {
    /// Category.
    pub kind: VerifyErrorKind,
    /// Detail for logs and the client.
    pub reason: String,
}

/// Normalized outcome of checking one transaction on one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// The transaction pays the expected address the expected amount.
    pub verified: bool,
    /// Amount found on-chain in display units (zero when nothing was read).
    pub amount: Decimal,
    /// Sender address, when the chain exposes one.
    pub from_address: Option<String>,
    /// Receiving address found on-chain.
    pub to_address: Option<String>,
    /// Confirmation depth.
    pub confirmations: u64,
    /// Block hash or height.
    pub block_reference: Option<String>,
    /// Set when `verified` is false.
    pub error: Option<VerificationError>,
}

impl VerificationResult {
    /// A failure with nothing read from the chain.
    pub fn failure(kind: VerifyErrorKind, reason: impl Into<String>) -> Self {
        Self {
            verified: false,
            amount: Decimal::ZERO,
            from_address: None,
            to_address: None,
            confirmations: 0,
            block_reference: None,
            error: Some(VerificationError {
                kind,
                reason: reason.into(),
            }),
        }
    }

    /// Error kind, if the verification failed.
    #[must_use]
    pub fn error_kind(&self) -> Option<VerifyErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Observed transfer, before policy checks.
#[derive(Debug, Clone)]
pub(crate) struct ObservedTransfer {
    pub to_address: String,
    pub from_address: Option<String>,
    pub amount: Decimal,
    pub confirmations: u64,
    pub block_reference: Option<String>,
}

/// How receiving addresses are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressMatch {
    Exact,
    CaseInsensitive,
}

impl AddressMatch {
    pub(crate) fn matches(self, expected: &str, actual: &str) -> bool {
        match self {
            Self::Exact => expected.trim() == actual.trim(),
            Self::CaseInsensitive => expected.trim().eq_ignore_ascii_case(actual.trim()),
        }
    }
}

/// Apply address, amount and confirmation policy to an observed transfer.
pub(crate) fn evaluate_transfer(
    observed: ObservedTransfer,
    expected_address: &str,
    expected_amount: Decimal,
    address_match: AddressMatch,
    min_confirmations: u64,
) -> VerificationResult {
    let mut result = VerificationResult {
        verified: false,
        amount: observed.amount,
        from_address: observed.from_address,
        to_address: Some(observed.to_address.clone()),
        confirmations: observed.confirmations,
        block_reference: observed.block_reference,
        error: None,
    };

    let error = if !address_match.matches(expected_address, &observed.to_address) {
        Some(VerificationError {
            kind: VerifyErrorKind::AddressMismatch,
            reason: format!(
                "paid to {} instead of {expected_address}",
                observed.to_address
            ),
        })
    } else if !amounts_match(expected_amount, observed.amount) {
        Some(VerificationError {
            kind: VerifyErrorKind::AmountMismatch,
            reason: format!(
                "paid {} but expected {expected_amount}",
                observed.amount
            ),
        })
    } else if observed.confirmations < min_confirmations {
        Some(VerificationError {
            kind: VerifyErrorKind::Unconfirmed,
            reason: format!(
                "{} of {min_confirmations} confirmations",
                observed.confirmations
            ),
        })
    } else {
        None
    };

    result.verified = error.is_none();
    result.error = error;
    result
}

/// Relative-tolerance amount comparison.
///
/// `actual` matches when `|actual - expected| <= expected * 0.01%`. Exact
/// equality is never required because of fee and precision drift.
#[must_use]
pub fn amounts_match(expected: Decimal, actual: Decimal) -> bool {
    if expected.is_zero() {
        return actual.is_zero();
    }
    let allowed = (expected * AMOUNT_TOLERANCE).abs();
    (actual - expected).abs() <= allowed
}

/// Convert an integer amount in the chain's smallest unit to display units.
///
/// # Errors
///
/// Returns an error if the value cannot be represented at that scale.
pub fn from_base_units(raw: u128, decimals: u32) -> crate::Result<Decimal> {
    let signed = i128::try_from(raw)
        .map_err(|_| crate::Error::Chain(format!("amount {raw} out of range")))?;
    Decimal::try_from_i128_with_scale(signed, decimals)
        .map(|d| d.normalize())
        .map_err(|e| crate::Error::Chain(format!("amount {raw} at scale {decimals}: {e}")))
}

/// Verifies a transaction reference against one chain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Ledger family.
    fn kind(&self) -> ChainKind;

    /// Currency code this adapter settles.
    fn currency(&self) -> &str;

    /// Confirmation depth this adapter requires.
    fn min_confirmations(&self) -> u64;

    /// Check that `tx_ref` pays `expected_address` the `expected_amount`.
    async fn verify(
        &self,
        tx_ref: &str,
        expected_address: &str,
        expected_amount: Decimal,
    ) -> VerificationResult;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tolerance_bounds() {
        assert!(amounts_match(dec!(1), dec!(1.0001)));
        assert!(amounts_match(dec!(1), dec!(0.9999)));
        assert!(!amounts_match(dec!(1), dec!(1.00011)));
        assert!(!amounts_match(dec!(1), dec!(0.99989)));
        assert!(amounts_match(dec!(0), dec!(0)));
        assert!(!amounts_match(dec!(0), dec!(0.00000001)));
    }

    #[test]
    fn test_base_unit_scaling() {
        assert_eq!(from_base_units(1_000_000, 8).unwrap(), dec!(0.01));
        assert_eq!(
            from_base_units(1_500_000_000_000_000_000, 18).unwrap(),
            dec!(1.5)
        );
        assert_eq!(from_base_units(2_500_000, 6).unwrap(), dec!(2.5));
    }

    #[test]
    fn test_evaluate_transfer_order_of_checks() {
        let observed = ObservedTransfer {
            to_address: "0xABC".into(),
            from_address: None,
            amount: dec!(2),
            confirmations: 0,
            block_reference: None,
        };
        let result = evaluate_transfer(
            observed,
            "0xabc",
            dec!(1),
            AddressMatch::CaseInsensitive,
            1,
        );
        assert_eq!(result.error_kind(), Some(VerifyErrorKind::AmountMismatch));
        assert_eq!(result.amount, dec!(2));
    }

    #[test]
    fn test_only_unreachable_leaves_no_record() {
        assert!(!VerifyErrorKind::ChainUnreachable.persists_failure());
        assert!(VerifyErrorKind::Unconfirmed.persists_failure());
        assert!(VerifyErrorKind::UnsupportedCurrency.persists_failure());
        assert!(VerifyErrorKind::AmountMismatch.persists_failure());
        assert!(VerifyErrorKind::NotFound.persists_failure());
    }

    proptest! {
        #[test]
        fn prop_within_tolerance_matches(units in 1u64..1_000_000_000_000, bps in -100i64..=100) {
            // bps of the tolerance window, in hundredths of the allowed drift
            let expected = Decimal::new(i64::try_from(units).unwrap(), 8);
            let drift = expected * AMOUNT_TOLERANCE * Decimal::new(bps, 2);
            prop_assert!(amounts_match(expected, expected + drift));
        }

        #[test]
        fn prop_outside_tolerance_fails(units in 1u64..1_000_000_000_000, extra in 2i64..10_000) {
            let expected = Decimal::new(i64::try_from(units).unwrap(), 8);
            let drift = expected * AMOUNT_TOLERANCE * Decimal::new(100 + extra, 2);
            prop_assert!(!amounts_match(expected, expected + drift));
            prop_assert!(!amounts_match(expected, expected - drift));
        }
    }
}
