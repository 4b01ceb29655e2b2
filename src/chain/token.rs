//! Adapter for token transfers on account chains.
//!
//! The transfer is read from the receipt's event log rather than the
//! transaction value: the transaction itself targets the token contract and
//! carries no native value.

use super::source::{AccountSource, LogEntry};
use super::{
    evaluate_transfer, from_base_units, AddressMatch, ChainAdapter, ChainKind, ObservedTransfer,
    VerificationResult, VerifyErrorKind,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// `keccak256("Transfer(address,address,uint256)")`.
pub const TRANSFER_EVENT_TOPIC: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// A decoded token `Transfer` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    /// Sender address, lowercase `0x` form.
    pub from: String,
    /// Recipient address, lowercase `0x` form.
    pub to: String,
    /// Amount in the token's smallest unit.
    pub raw_amount: u128,
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Decode an address from a 32-byte indexed topic (low 20 bytes).
fn decode_address_word(word: &str) -> Option<String> {
    let bytes = hex::decode(strip_0x(word)).ok()?;
    if bytes.len() != 32 || bytes[..12].iter().any(|b| *b != 0) {
        return None;
    }
    Some(format!("0x{}", hex::encode(&bytes[12..])))
}

/// Decode a 32-byte big-endian unsigned word that must fit in 128 bits.
fn decode_amount_word(word: &str) -> Option<u128> {
    let bytes = hex::decode(strip_0x(word)).ok()?;
    if bytes.len() != 32 || bytes[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..]);
    Some(u128::from_be_bytes(low))
}

/// Decode a `Transfer` event, or `None` if the log is some other event.
#[must_use]
pub fn decode_transfer(log: &LogEntry) -> Option<TokenTransfer> {
    if log.topics.len() < 3 || !log.topics[0].eq_ignore_ascii_case(TRANSFER_EVENT_TOPIC) {
        return None;
    }
    Some(TokenTransfer {
        from: decode_address_word(&log.topics[1])?,
        to: decode_address_word(&log.topics[2])?,
        raw_amount: decode_amount_word(&log.data)?,
    })
}

/// Verifies token payments by decoding `Transfer` events of a known contract.
pub struct TokenAdapter<S> {
    currency: String,
    source: S,
    contract: String,
    decimals: u32,
    min_confirmations: u64,
}

impl<S: AccountSource> TokenAdapter<S> {
    /// Create an adapter for the token at `contract` with `decimals` places.
    pub fn new(
        currency: impl Into<String>,
        source: S,
        contract: impl Into<String>,
        decimals: u32,
    ) -> Self {
        Self {
            currency: currency.into(),
            source,
            contract: contract.into(),
            decimals,
            min_confirmations: 0,
        }
    }

    /// Override the required confirmation depth.
    #[must_use]
    pub fn with_min_confirmations(mut self, min_confirmations: u64) -> Self {
        self.min_confirmations = min_confirmations;
        self
    }

    /// Token contract address.
    #[must_use]
    pub fn contract(&self) -> &str {
        &self.contract
    }
}

#[async_trait]
impl<S: AccountSource> ChainAdapter for TokenAdapter<S> {
    fn kind(&self) -> ChainKind {
        ChainKind::Token
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

        let targets_contract = tx
            .to
            .as_deref()
            .is_some_and(|to| AddressMatch::CaseInsensitive.matches(&self.contract, to));
        if !targets_contract {
            return VerificationResult::failure(
                VerifyErrorKind::WrongContract,
                format!(
                    "{tx_ref} does not call the {} contract {}",
                    self.currency, self.contract
                ),
            );
        }

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

        let transfers: Vec<TokenTransfer> = receipt
            .logs
            .iter()
            .filter(|log| AddressMatch::CaseInsensitive.matches(&self.contract, &log.address))
            .filter_map(decode_transfer)
            .collect();

        // Prefer the transfer that pays the merchant; otherwise report the
        // first one so the mismatch names where the tokens actually went.
        let Some(transfer) = transfers
            .iter()
            .find(|t| AddressMatch::CaseInsensitive.matches(expected_address, &t.to))
            .or_else(|| transfers.first())
            .cloned()
        else {
            return VerificationResult::failure(
                VerifyErrorKind::NotFound,
                format!("no {} transfer event in {tx_ref}", self.currency),
            );
        };

        let amount = match from_base_units(transfer.raw_amount, self.decimals) {
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
            "{} transfer {tx_ref}: {amount} to {}, {confirmations} confirmations",
            self.currency, transfer.to
        );

        evaluate_transfer(
            ObservedTransfer {
                to_address: transfer.to,
                from_address: Some(transfer.from),
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
