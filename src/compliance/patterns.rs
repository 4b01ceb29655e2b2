//! Behavioural pattern detectors over a user's transaction window.
//!
//! Each detector takes the transaction under review plus the user's prior
//! records (not including it) and returns a finding or `None`.

use super::gate::ScreenedTransaction;
use crate::model::{RecordStatus, TransactionRecord};
use chrono::Duration;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const STRUCTURING_WINDOW_HOURS: i64 = 24;
const STRUCTURING_MIN_COUNT: usize = 3;
const RAPID_WINDOW_MINUTES: i64 = 60;
const RAPID_MIN_COUNT: usize = 5;
const ANOMALY_BASELINE_DAYS: i64 = 30;
const ANOMALY_MIN_BASELINE: usize = 5;
const ANOMALY_MULTIPLE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Several just-under-threshold transactions in a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuringFinding {
    /// Transactions in the band, including the current one.
    pub count: usize,
    /// Their combined fiat value.
    pub total: Decimal,
    /// Window length.
    pub window_hours: i64,
}

/// Burst of transactions within an hour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RapidSuccessionFinding {
    /// Transactions in the window, including the current one.
    pub count: usize,
    /// Window length.
    pub window_minutes: i64,
}

/// Amount far above the user's established baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyFinding {
    /// Current fiat amount.
    pub amount: Decimal,
    /// Mean of the baseline transactions.
    pub historical_mean: Decimal,
    /// Number of baseline transactions.
    pub baseline_count: usize,
}

/// Structuring, rapid succession and amount anomaly detectors.
#[derive(Debug, Clone)]
pub struct PatternDetector {
    structuring_floor: Decimal,
    ctr_threshold: Decimal,
}

impl PatternDetector {
    /// Create a detector for the `[structuring_floor, ctr_threshold)` band.
    #[must_use]
    pub const fn new(structuring_floor: Decimal, ctr_threshold: Decimal) -> Self {
        Self {
            structuring_floor,
            ctr_threshold,
        }
    }

    fn in_band(&self, amount: Decimal) -> bool {
        amount >= self.structuring_floor && amount < self.ctr_threshold
    }

    /// At least three completed transactions in the band within 24 hours.
    #[must_use]
    pub fn structuring(
        &self,
        tx: &ScreenedTransaction,
        history: &[TransactionRecord],
    ) -> Option<StructuringFinding> {
        if !self.in_band(tx.amount_fiat) {
            return None;
        }
        let since = tx.at - Duration::hours(STRUCTURING_WINDOW_HOURS);
        let (count, total) = history
            .iter()
            .filter(|r| r.status == RecordStatus::Completed)
            .filter(|r| r.timestamp > since && r.timestamp <= tx.at)
            .filter(|r| self.in_band(r.amount_fiat))
            .fold((1, tx.amount_fiat), |(n, sum), r| (n + 1, sum + r.amount_fiat));

        (count >= STRUCTURING_MIN_COUNT).then_some(StructuringFinding {
            count,
            total,
            window_hours: STRUCTURING_WINDOW_HOURS,
        })
    }

    /// At least five transactions, of any outcome, within an hour.
    #[must_use]
    pub fn rapid_succession(
        &self,
        tx: &ScreenedTransaction,
        history: &[TransactionRecord],
    ) -> Option<RapidSuccessionFinding> {
        let since = tx.at - Duration::minutes(RAPID_WINDOW_MINUTES);
        let count = 1 + history
            .iter()
            .filter(|r| r.timestamp > since && r.timestamp <= tx.at)
            .count();
        (count >= RAPID_MIN_COUNT).then_some(RapidSuccessionFinding {
            count,
            window_minutes: RAPID_WINDOW_MINUTES,
        })
    }

    /// Amount above five times the mean of completed transactions older than
    /// 30 days, given at least five of them.
    #[must_use]
    pub fn anomaly(
        &self,
        tx: &ScreenedTransaction,
        history: &[TransactionRecord],
    ) -> Option<AnomalyFinding> {
        let cutoff = tx.at - Duration::days(ANOMALY_BASELINE_DAYS);
        let baseline: Vec<Decimal> = history
            .iter()
            .filter(|r| r.status == RecordStatus::Completed && r.timestamp < cutoff)
            .map(|r| r.amount_fiat)
            .collect();
        if baseline.len() < ANOMALY_MIN_BASELINE {
            return None;
        }
        let mean = baseline.iter().sum::<Decimal>() / Decimal::from(baseline.len());
        (tx.amount_fiat > mean * ANOMALY_MULTIPLE).then(|| AnomalyFinding {
            amount: tx.amount_fiat,
            historical_mean: mean.round_dp(2),
            baseline_count: baseline.len(),
        })
    }
}
