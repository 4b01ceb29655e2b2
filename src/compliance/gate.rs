//! Compliance decision for one settled transaction.

use super::patterns::PatternDetector;
use super::screening::{SanctionsScreener, ScreeningOutcome, ScreeningResult};
use crate::config::{ComplianceConfig, RiskConfig};
use crate::model::{Alert, AlertType, Payment, Severity, TransactionRecord, UserProfile};
use crate::risk::{RiskAssessment, RiskInput, RiskLevel, RiskScoringEngine};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// The transaction under review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenedTransaction {
    /// Payment id; also the id of its history record.
    pub payment_id: String,
    /// Order the payment settled.
    pub order_id: Option<String>,
    /// Paying user.
    pub user_id: String,
    /// Fiat value.
    pub amount_fiat: Decimal,
    /// Cryptocurrency code.
    pub currency: String,
    /// Settlement time.
    pub at: DateTime<Utc>,
}

impl ScreenedTransaction {
    /// Describe a settled payment.
    #[must_use]
    pub fn from_payment(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id.clone(),
            order_id: Some(payment.order_id.clone()),
            user_id: payment.user_id.clone(),
            amount_fiat: payment.amount_fiat,
            currency: payment.currency.clone(),
            at: payment.confirmed_at.unwrap_or(payment.updated_at),
        }
    }
}

/// Outcome of [`ComplianceGate::evaluate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceDecision {
    /// False only when a critical alert fired.
    pub allowed: bool,
    /// True whenever any alert fired.
    pub requires_review: bool,
    /// Alerts raised, one per triggered condition.
    pub alerts: Vec<Alert>,
    /// Risk score.
    pub risk: RiskAssessment,
    /// Sanctions screening result.
    pub screening: ScreeningResult,
    /// Evaluation time.
    pub evaluated_at: DateTime<Utc>,
}

/// Runs screening, risk scoring and pattern detection and turns the results
/// into alerts.
#[derive(Debug, Clone)]
pub struct ComplianceGate {
    ctr_threshold: Decimal,
    large_threshold: Decimal,
    screener: SanctionsScreener,
    risk: RiskScoringEngine,
    patterns: PatternDetector,
}

impl ComplianceGate {
    /// Build a gate from configuration.
    #[must_use]
    pub fn new(compliance: &ComplianceConfig, risk: &RiskConfig) -> Self {
        Self {
            ctr_threshold: compliance.ctr_threshold,
            large_threshold: compliance.large_transaction_threshold,
            screener: SanctionsScreener::new(compliance),
            risk: RiskScoringEngine::new(risk),
            patterns: PatternDetector::new(
                compliance.structuring_floor,
                compliance.ctr_threshold,
            ),
        }
    }

    /// Evaluate `tx` for `user`, given the user's prior records.
    #[must_use]
    pub fn evaluate(
        &self,
        tx: &ScreenedTransaction,
        user: &UserProfile,
        history: &[TransactionRecord],
    ) -> ComplianceDecision {
        let mut alerts = Vec::new();
        let mut raise = |alert_type: AlertType, severity: Severity, details: serde_json::Value| {
            let mut alert = Alert::new(alert_type, severity, &tx.user_id, details);
            alert.order_id.clone_from(&tx.order_id);
            alert.payment_id = Some(tx.payment_id.clone());
            alerts.push(alert);
        };

        let screening = self.screener.screen(user);
        match screening.result {
            ScreeningOutcome::ConfirmedMatch => raise(
                AlertType::SanctionsHit,
                Severity::Critical,
                json!({ "result": screening.result, "score": screening.score, "matches": screening.matches }),
            ),
            ScreeningOutcome::PotentialMatch => raise(
                AlertType::SanctionsHit,
                Severity::High,
                json!({ "result": screening.result, "score": screening.score, "matches": screening.matches }),
            ),
            ScreeningOutcome::Clear => {}
        }

        if tx.amount_fiat >= self.ctr_threshold {
            raise(
                AlertType::CtrRequired,
                Severity::Medium,
                json!({ "amount": tx.amount_fiat, "threshold": self.ctr_threshold }),
            );
        }
        if tx.amount_fiat > self.large_threshold {
            raise(
                AlertType::LargeTransaction,
                Severity::Medium,
                json!({ "amount": tx.amount_fiat, "threshold": self.large_threshold, "currency": tx.currency }),
            );
        }

        if let Some(finding) = self.patterns.structuring(tx, history) {
            raise(AlertType::Structuring, Severity::Critical, json!(finding));
        }
        if let Some(finding) = self.patterns.rapid_succession(tx, history) {
            raise(AlertType::RapidSuccession, Severity::High, json!(finding));
        }
        if let Some(finding) = self.patterns.anomaly(tx, history) {
            raise(AlertType::AmountAnomaly, Severity::Medium, json!(finding));
        }

        let country = user.country.trim();
        let risk = self.risk.score(
            &RiskInput {
                amount_fiat: tx.amount_fiat,
                at: tx.at,
                country: (!country.is_empty()).then_some(country),
            },
            history,
        );
        if risk.level >= RiskLevel::High {
            raise(
                AlertType::HighRiskScore,
                Severity::High,
                json!({ "total": risk.total, "level": risk.level, "factors": risk.factors }),
            );
        }

        let allowed = !alerts.iter().any(|a| a.severity == Severity::Critical);
        let requires_review = !alerts.is_empty();
        ComplianceDecision {
            allowed,
            requires_review,
            alerts,
            risk,
            screening,
            evaluated_at: Utc::now(),
        }
    }
}
