//! Rule-based transaction risk scoring.
//!
//! The score is a weighted sum of five sub-scores, each in `0..=100`:
//!
//! ```text
//!   amount ........ 0.30   step function of the fiat amount
//!   frequency ..... 0.20   user's transactions in the trailing 7 days
//!   user history .. 0.20   success rate of past transactions
//!   geography ..... 0.15   high / medium risk country lists
//!   timing ........ 0.15   hour of day (UTC)
//! ```
//!
//! Everything here is a pure function of its inputs.

use crate::config::RiskConfig;
use crate::model::{RecordStatus, TransactionRecord};
use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

const WEIGHT_AMOUNT: Decimal = Decimal::from_parts(30, 0, 0, false, 2);
const WEIGHT_FREQUENCY: Decimal = Decimal::from_parts(20, 0, 0, false, 2);
const WEIGHT_HISTORY: Decimal = Decimal::from_parts(20, 0, 0, false, 2);
const WEIGHT_GEOGRAPHY: Decimal = Decimal::from_parts(15, 0, 0, false, 2);
const WEIGHT_TIMING: Decimal = Decimal::from_parts(15, 0, 0, false, 2);

/// Risk level derived from the total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Below 30.
    Low,
    /// 30 to 59.
    Medium,
    /// 60 to 79.
    High,
    /// 80 and above.
    Critical,
}

impl RiskLevel {
    /// Level for a total score.
    #[must_use]
    pub const fn from_score(total: u8) -> Self {
        match total {
            0..=29 => Self::Low,
            30..=59 => Self::Medium,
            60..=79 => Self::High,
            _ => Self::Critical,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Individual sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    /// Amount sub-score.
    pub amount: u8,
    /// Frequency sub-score.
    pub frequency: u8,
    /// User history sub-score.
    pub user_history: u8,
    /// Geography sub-score.
    pub geography: u8,
    /// Timing sub-score.
    pub timing: u8,
}

/// Result of scoring one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Weighted total in `0..=100`.
    pub total: u8,
    /// Level of `total`.
    pub level: RiskLevel,
    /// Sub-scores.
    pub breakdown: RiskBreakdown,
    /// Human-readable reasons for elevated sub-scores.
    pub factors: Vec<String>,
}

/// Transaction being scored.
#[derive(Debug, Clone, Copy)]
pub struct RiskInput<'a> {
    /// Fiat value.
    pub amount_fiat: Decimal,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// User's ISO country code, if known.
    pub country: Option<&'a str>,
}

/// Deterministic scorer over explicit inputs.
#[derive(Debug, Clone)]
pub struct RiskScoringEngine {
    high_risk: HashSet<String>,
    medium_risk: HashSet<String>,
}

impl RiskScoringEngine {
    /// Create an engine with the configured country lists.
    #[must_use]
    pub fn new(config: &RiskConfig) -> Self {
        let upper = |list: &[String]| -> HashSet<String> {
            list.iter().map(|c| c.trim().to_ascii_uppercase()).collect()
        };
        Self {
            high_risk: upper(&config.high_risk_countries),
            medium_risk: upper(&config.medium_risk_countries),
        }
    }

    /// Score `tx` given the user's prior transactions.
    #[must_use]
    pub fn score(&self, tx: &RiskInput<'_>, history: &[TransactionRecord]) -> RiskAssessment {
        let breakdown = RiskBreakdown {
            amount: amount_score(tx.amount_fiat),
            frequency: frequency_score(history, tx.at),
            user_history: history_score(history),
            geography: self.geography_score(tx.country),
            timing: timing_score(tx.at),
        };

        let weighted = WEIGHT_AMOUNT * Decimal::from(breakdown.amount)
            + WEIGHT_FREQUENCY * Decimal::from(breakdown.frequency)
            + WEIGHT_HISTORY * Decimal::from(breakdown.user_history)
            + WEIGHT_GEOGRAPHY * Decimal::from(breakdown.geography)
            + WEIGHT_TIMING * Decimal::from(breakdown.timing);
        let total = weighted
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u8()
            .unwrap_or(100)
            .min(100);

        RiskAssessment {
            total,
            level: RiskLevel::from_score(total),
            breakdown,
            factors: factors(&breakdown, tx),
        }
    }

    fn geography_score(&self, country: Option<&str>) -> u8 {
        let Some(country) = country.map(|c| c.trim().to_ascii_uppercase()) else {
            return 20;
        };
        if self.high_risk.contains(&country) {
            90
        } else if self.medium_risk.contains(&country) {
            60
        } else {
            20
        }
    }
}

fn amount_score(amount: Decimal) -> u8 {
    let steps: [(i64, u8); 5] = [(100, 10), (1_000, 20), (5_000, 40), (10_000, 60), (50_000, 80)];
    steps
        .iter()
        .find(|(bound, _)| amount < Decimal::from(*bound))
        .map_or(95, |(_, score)| *score)
}

fn frequency_score(history: &[TransactionRecord], at: DateTime<Utc>) -> u8 {
    if history.is_empty() {
        return 30;
    }
    let since = at - Duration::days(7);
    let recent = history
        .iter()
        .filter(|r| r.timestamp > since && r.timestamp <= at)
        .count();
    match recent {
        0..=2 => 15,
        3..=5 => 30,
        6..=10 => 50,
        _ => 80,
    }
}

fn history_score(history: &[TransactionRecord]) -> u8 {
    if history.is_empty() {
        return 40;
    }
    let completed = history
        .iter()
        .filter(|r| r.status == RecordStatus::Completed)
        .count();
    // Success rate in basis points keeps this in integer arithmetic.
    let rate = completed * 10_000 / history.len();
    match rate {
        0..=4_999 => 80,
        5_000..=7_999 => 50,
        8_000..=9_499 => 25,
        _ => 10,
    }
}

fn timing_score(at: DateTime<Utc>) -> u8 {
    match at.hour() {
        2..=4 => 60,
        9..=16 => 10,
        _ => 30,
    }
}

fn factors(breakdown: &RiskBreakdown, tx: &RiskInput<'_>) -> Vec<String> {
    let mut factors = Vec::new();
    if breakdown.amount >= 60 {
        factors.push(format!("large amount {}", tx.amount_fiat));
    }
    if breakdown.frequency >= 50 {
        factors.push("high transaction frequency".to_string());
    }
    if breakdown.user_history >= 50 {
        factors.push("poor payment history".to_string());
    }
    if breakdown.geography >= 60 {
        factors.push(format!(
            "elevated-risk jurisdiction {}",
            tx.country.unwrap_or_default()
        ));
    }
    if breakdown.timing >= 60 {
        factors.push(format!("unusual hour {:02}:00 UTC", tx.at.hour()));
    }
    factors
}
