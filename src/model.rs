//! Domain records owned or consumed by the settlement pipeline.

use crate::chain::VerifyErrorKind;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Awaiting payment.
    #[default]
    Pending,
    /// Payment confirmed on-chain.
    Paid,
    /// Being prepared for shipment.
    Processing,
    /// Handed to the carrier.
    Shipped,
    /// Received by the customer.
    Delivered,
    /// Cancelled before fulfillment.
    Cancelled,
    /// Refunded after payment.
    Refunded,
}

impl OrderStatus {
    /// Whether a confirmed payment exists for an order in this status.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Paid | Self::Processing | Self::Shipped | Self::Delivered
        )
    }

    /// Whether the order can move from `self` to `next`.
    ///
    /// Forward moves only, except cancellation and refund which are reachable
    /// from `pending` and `paid`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use OrderStatus::{Cancelled, Delivered, Paid, Pending, Processing, Refunded, Shipped};
        matches!(
            (self, next),
            (Pending, Paid)
                | (Paid, Processing)
                | (Processing, Shipped)
                | (Processing, Delivered)
                | (Shipped, Delivered)
                | (Pending | Paid, Cancelled | Refunded)
        )
    }

    /// Lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One purchased product in an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Product reference.
    pub product_id: String,
    /// Units purchased.
    pub quantity: u32,
    /// Unit price in the order's cryptocurrency.
    pub unit_price_crypto: Decimal,
    /// Unit price in the fiat reference currency.
    pub unit_price_fiat: Decimal,
}

/// A purchase intent handed over by the checkout collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Order id.
    pub id: String,
    /// Purchasing user.
    pub user_id: String,
    /// Line items.
    pub items: Vec<LineItem>,
    /// Total in the target cryptocurrency.
    pub total_crypto: Decimal,
    /// Total in the fiat reference currency.
    pub total_fiat: Decimal,
    /// Fiat reference currency code.
    #[serde(default = "default_fiat_currency")]
    pub fiat_currency: String,
    /// Target cryptocurrency code (e.g. `BTC`).
    pub currency: String,
    /// Address the customer must pay.
    pub payment_address: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: OrderStatus,
    /// Transaction reference of the confirmed payment.
    #[serde(default)]
    pub transaction_reference: Option<String>,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// When the order was paid.
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

fn default_fiat_currency() -> String {
    "USD".to_string()
}

impl Order {
    /// Build a pending order, deriving totals from the line items.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOrder`] for an empty order, a zero quantity, a
    /// negative unit price, totals that do not fit a `Decimal`, or a crypto
    /// total that is not positive.
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        items: Vec<LineItem>,
        currency: impl Into<String>,
        payment_address: impl Into<String>,
    ) -> Result<Self> {
        let id = id.into();
        if items.is_empty() {
            return Err(Error::InvalidOrder(format!("order {id} has no line items")));
        }
        let mut total_crypto = Decimal::ZERO;
        let mut total_fiat = Decimal::ZERO;
        for item in &items {
            if item.quantity == 0 {
                return Err(Error::InvalidOrder(format!(
                    "order {id}: zero quantity for {}",
                    item.product_id
                )));
            }
            if item.unit_price_crypto.is_sign_negative() || item.unit_price_fiat.is_sign_negative() {
                return Err(Error::InvalidOrder(format!(
                    "order {id}: negative price for {}",
                    item.product_id
                )));
            }
            let quantity = Decimal::from(item.quantity);
            let overflow = || Error::InvalidOrder(format!("order {id}: total out of range"));
            total_crypto = item
                .unit_price_crypto
                .checked_mul(quantity)
                .and_then(|line| total_crypto.checked_add(line))
                .ok_or_else(overflow)?;
            total_fiat = item
                .unit_price_fiat
                .checked_mul(quantity)
                .and_then(|line| total_fiat.checked_add(line))
                .ok_or_else(overflow)?;
        }
        if total_crypto <= Decimal::ZERO {
            return Err(Error::InvalidOrder(format!(
                "order {id}: crypto total must be positive"
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id,
            user_id: user_id.into(),
            items,
            total_crypto,
            total_fiat,
            fiat_currency: default_fiat_currency(),
            currency: normalize_currency(&currency.into()),
            payment_address: payment_address.into(),
            status: OrderStatus::Pending,
            transaction_reference: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        })
    }
}

/// Canonical currency code form (trimmed, uppercase).
#[must_use]
pub fn normalize_currency(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Payment verification status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Verification in progress.
    Pending,
    /// Verified on-chain and settled.
    Confirmed,
    /// Verification rejected the transaction.
    Failed,
}

/// One verification attempt/result for a transaction reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Payment id.
    pub id: String,
    /// Order the payment was submitted for.
    pub order_id: String,
    /// Paying user.
    pub user_id: String,
    /// On-chain transaction reference; globally unique.
    pub transaction_reference: String,
    /// Cryptocurrency code.
    pub currency: String,
    /// Amount the chain reported (or the expected amount if nothing was read).
    pub amount: Decimal,
    /// Fiat value of the order at settlement.
    pub amount_fiat: Decimal,
    /// Sender address, when known.
    pub from_address: Option<String>,
    /// Receiving address.
    pub to_address: String,
    /// Verification status.
    pub status: PaymentStatus,
    /// Confirmations observed at last verification.
    pub confirmations: u64,
    /// Block hash or height containing the transaction.
    pub block_reference: Option<String>,
    /// Number of verification attempts on this record.
    pub verification_attempts: u32,
    /// Failure category of the last failed attempt.
    pub failure_kind: Option<VerifyErrorKind>,
    /// Failure detail of the last failed attempt.
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Confirmation time.
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Enumerated alert patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Fiat amount above the large-transaction bound.
    LargeTransaction,
    /// Fiat amount at or above the CTR reporting threshold.
    CtrRequired,
    /// Several transactions just under the reporting threshold.
    Structuring,
    /// Burst of transactions in a short window.
    RapidSuccession,
    /// Amount far above the user's historical mean.
    AmountAnomaly,
    /// Sanctions list match.
    SanctionsHit,
    /// Risk score at high or critical level.
    HighRiskScore,
}

impl AlertType {
    /// Snake-case name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LargeTransaction => "large_transaction",
            Self::CtrRequired => "ctr_required",
            Self::Structuring => "structuring",
            Self::RapidSuccession => "rapid_succession",
            Self::AmountAnomaly => "amount_anomaly",
            Self::SanctionsHit => "sanctions_hit",
            Self::HighRiskScore => "high_risk_score",
        }
    }
}

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational.
    Low,
    /// Needs a look.
    Medium,
    /// Needs review before fulfillment.
    High,
    /// Blocks the transaction.
    Critical,
}

/// Case-management status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Newly raised.
    Open,
    /// An analyst picked it up.
    UnderReview,
    /// Closed without filing.
    Resolved,
    /// Escalated to a senior analyst.
    Escalated,
    /// Regulatory report filed.
    Filed,
}

impl AlertStatus {
    /// Terminal statuses cannot change.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Resolved | Self::Filed)
    }
}

/// Outcome recorded when an alert is closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resolution {
    /// Analyst who closed the alert.
    pub resolved_by: String,
    /// Free-form note.
    pub note: String,
    /// When the alert was closed.
    pub resolved_at: DateTime<Utc>,
}

/// One fraud/compliance signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id.
    pub id: String,
    /// Pattern that fired.
    pub alert_type: AlertType,
    /// Severity.
    pub severity: Severity,
    /// Case status.
    pub status: AlertStatus,
    /// Subject user.
    pub user_id: String,
    /// Related order.
    pub order_id: Option<String>,
    /// Related payment.
    pub payment_id: Option<String>,
    /// Detector-specific details.
    pub details: serde_json::Value,
    /// Closing record.
    pub resolution: Option<Resolution>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Create an open alert.
    #[must_use]
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        user_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type,
            severity,
            status: AlertStatus::Open,
            user_id: user_id.into(),
            order_id: None,
            payment_id: None,
            details,
            resolution: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the settlement this alert was raised for.
    #[must_use]
    pub fn for_settlement(mut self, order_id: &str, payment_id: &str) -> Self {
        self.order_id = Some(order_id.to_string());
        self.payment_id = Some(payment_id.to_string());
        self
    }
}

/// User profile as supplied by the account collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// User id.
    pub id: String,
    /// Full name used for sanctions screening.
    pub name: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    /// Account creation time.
    #[serde(default = "Utc::now")]
    pub registered_at: DateTime<Utc>,
}

/// Outcome of a historical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Settled successfully.
    Completed,
    /// Verification failed.
    Failed,
}

/// A past transaction as seen by risk scoring and pattern detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Payment id.
    pub id: String,
    /// User who made the transaction.
    pub user_id: String,
    /// Fiat value.
    pub amount_fiat: Decimal,
    /// Cryptocurrency code.
    pub currency: String,
    /// When the transaction was settled or rejected.
    pub timestamp: DateTime<Utc>,
    /// Outcome.
    pub status: RecordStatus,
}

impl TransactionRecord {
    /// Build the history record for a payment.
    #[must_use]
    pub fn from_payment(payment: &Payment) -> Self {
        Self {
            id: payment.id.clone(),
            user_id: payment.user_id.clone(),
            amount_fiat: payment.amount_fiat,
            currency: payment.currency.clone(),
            timestamp: payment.confirmed_at.unwrap_or(payment.updated_at),
            status: if payment.status == PaymentStatus::Confirmed {
                RecordStatus::Completed
            } else {
                RecordStatus::Failed
            },
        }
    }
}
