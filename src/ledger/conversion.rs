//! Crypto to fiat conversion workflow.

use crate::error::{Error, Result};
use crate::model::normalize_currency;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Default number of retries after a failed conversion.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Conversion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionStatus {
    /// Waiting to start.
    Pending,
    /// Exchange in progress.
    Converting,
    /// Fiat delivered.
    Completed,
    /// Exchange failed; may be retried.
    Failed,
    /// Abandoned.
    Cancelled,
}

impl ConversionStatus {
    fn can_transition_to(self, next: Self) -> bool {
        use ConversionStatus::{Cancelled, Completed, Converting, Failed, Pending};
        matches!(
            (self, next),
            (Pending, Converting | Cancelled)
                | (Converting, Completed | Failed | Cancelled)
                | (Failed, Pending)
        )
    }
}

/// Fees deducted from the fiat proceeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Exchange fee.
    pub exchange_fee: Decimal,
    /// Network fee, in fiat.
    pub network_fee: Decimal,
    /// Processing fee.
    pub processing_fee: Decimal,
}

impl FeeBreakdown {
    /// Sum of all fees, `None` on overflow.
    #[must_use]
    pub fn total(&self) -> Option<Decimal> {
        self.exchange_fee
            .checked_add(self.network_fee)?
            .checked_add(self.processing_fee)
    }

    fn any_negative(&self) -> bool {
        [self.exchange_fee, self.network_fee, self.processing_fee]
            .iter()
            .any(Decimal::is_sign_negative)
    }
}

/// One entry of the status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status entered.
    pub status: ConversionStatus,
    /// When.
    pub at: DateTime<Utc>,
    /// Optional operator or system note.
    pub note: Option<String>,
}

/// A crypto to fiat conversion with an append-only status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionTransaction {
    /// Conversion id.
    pub id: String,
    /// Crypto amount sold.
    pub crypto_amount: Decimal,
    /// Crypto currency code.
    pub crypto_currency: String,
    /// Fiat proceeds after fees.
    pub fiat_amount: Decimal,
    /// Fiat currency code.
    pub fiat_currency: String,
    /// Fiat per crypto unit.
    pub exchange_rate: Decimal,
    /// Fees deducted.
    pub fees: FeeBreakdown,
    status: ConversionStatus,
    history: Vec<StatusChange>,
    retries: u32,
    /// Retries allowed after failures.
    pub max_retries: u32,
}

impl ConversionTransaction {
    /// Start a pending conversion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] for a non-positive amount or rate,
    /// negative fees, amounts out of range, or fees above the gross proceeds.
    pub fn new(
        crypto_amount: Decimal,
        crypto_currency: &str,
        fiat_currency: &str,
        exchange_rate: Decimal,
        fees: FeeBreakdown,
    ) -> Result<Self> {
        if crypto_amount <= Decimal::ZERO || exchange_rate <= Decimal::ZERO {
            return Err(Error::Conversion(
                "amount and exchange rate must be positive".into(),
            ));
        }
        if fees.any_negative() {
            return Err(Error::Conversion("fees cannot be negative".into()));
        }
        let gross = crypto_amount
            .checked_mul(exchange_rate)
            .ok_or_else(|| Error::Conversion("gross proceeds out of range".into()))?;
        let total_fees = fees
            .total()
            .ok_or_else(|| Error::Conversion("fees out of range".into()))?;
        if total_fees > gross {
            return Err(Error::Conversion(format!(
                "fees {total_fees} exceed proceeds {gross}"
            )));
        }
        let fiat_amount = gross - total_fees;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            crypto_amount,
            crypto_currency: normalize_currency(crypto_currency),
            fiat_amount,
            fiat_currency: normalize_currency(fiat_currency),
            exchange_rate,
            fees,
            status: ConversionStatus::Pending,
            history: vec![StatusChange {
                status: ConversionStatus::Pending,
                at: Utc::now(),
                note: None,
            }],
            retries: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Override the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> ConversionStatus {
        self.status
    }

    /// Every status entered, oldest first.
    #[must_use]
    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    /// Retries used so far.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Move to `next`, recording it in the history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] for a move the workflow does not
    /// allow. `failed → pending` is only reachable through [`Self::retry`].
    pub fn transition(&mut self, next: ConversionStatus, note: Option<String>) -> Result<()> {
        if next == ConversionStatus::Pending || !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition(format!(
                "conversion {}: {:?} -> {next:?}",
                self.id, self.status
            )));
        }
        self.push(next, note);
        Ok(())
    }

    /// Put a failed conversion back to pending.
    ///
    /// # Errors
    ///
    /// Returns an error unless the conversion failed and retries remain.
    pub fn retry(&mut self) -> Result<()> {
        if self.status != ConversionStatus::Failed {
            return Err(Error::InvalidTransition(format!(
                "conversion {} is {:?}, only failed conversions can be retried",
                self.id, self.status
            )));
        }
        if self.retries >= self.max_retries {
            return Err(Error::Conversion(format!(
                "conversion {} exhausted {} retries",
                self.id, self.max_retries
            )));
        }
        self.retries += 1;
        self.push(
            ConversionStatus::Pending,
            Some(format!("retry {}/{}", self.retries, self.max_retries)),
        );
        Ok(())
    }

    fn push(&mut self, status: ConversionStatus, note: Option<String>) {
        self.status = status;
        self.history.push(StatusChange {
            status,
            at: Utc::now(),
            note,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn conversion() -> ConversionTransaction {
        ConversionTransaction::new(
            dec!(0.01),
            "btc",
            "usd",
            dec!(50000),
            FeeBreakdown {
                exchange_fee: dec!(2.5),
                network_fee: dec!(1),
                processing_fee: dec!(0.5),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_fiat_amount_net_of_fees() {
        let c = conversion();
        assert_eq!(c.fiat_amount, dec!(496));
        assert_eq!(c.crypto_currency, "BTC");
        assert_eq!(c.status(), ConversionStatus::Pending);
        assert_eq!(c.history().len(), 1);
    }

    #[test]
    fn test_fees_above_proceeds_rejected() {
        let fees = FeeBreakdown {
            exchange_fee: dec!(10),
            ..FeeBreakdown::default()
        };
        assert!(ConversionTransaction::new(dec!(0.0001), "BTC", "USD", dec!(50000), fees).is_err());
    }

    #[test]
    fn test_out_of_range_amounts_rejected() {
        let huge = Decimal::MAX;
        assert!(matches!(
            ConversionTransaction::new(huge, "BTC", "USD", dec!(2), FeeBreakdown::default()),
            Err(Error::Conversion(_))
        ));

        let fees = FeeBreakdown {
            exchange_fee: huge,
            network_fee: huge,
            processing_fee: dec!(0),
        };
        assert_eq!(fees.total(), None);
        assert!(ConversionTransaction::new(dec!(1), "BTC", "USD", dec!(50000), fees).is_err());

        let negative = FeeBreakdown {
            network_fee: dec!(-5),
            ..FeeBreakdown::default()
        };
        assert!(ConversionTransaction::new(dec!(1), "BTC", "USD", dec!(100), negative).is_err());
    }

    #[test]
    fn test_workflow_and_history() {
        let mut c = conversion();
        c.transition(ConversionStatus::Converting, None).unwrap();
        c.transition(ConversionStatus::Completed, Some("wire sent".into()))
            .unwrap();
        assert!(c.transition(ConversionStatus::Cancelled, None).is_err());

        let statuses: Vec<_> = c.history().iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![
                ConversionStatus::Pending,
                ConversionStatus::Converting,
                ConversionStatus::Completed
            ]
        );
    }

    #[test]
    fn test_retry_bounded() {
        let mut c = conversion().with_max_retries(1);
        assert!(c.retry().is_err());
        c.transition(ConversionStatus::Converting, None).unwrap();
        c.transition(ConversionStatus::Failed, None).unwrap();
        assert!(c.transition(ConversionStatus::Pending, None).is_err());

        c.retry().unwrap();
        assert_eq!(c.retries(), 1);
        c.transition(ConversionStatus::Converting, None).unwrap();
        c.transition(ConversionStatus::Failed, None).unwrap();
        assert!(matches!(c.retry(), Err(Error::Conversion(_))));
    }
}
