//! Error types for the settlement service.

use crate::chain::VerifyErrorKind;
use thiserror::Error;

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the settlement pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// No order with this id.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// No payment with this id.
    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    /// No alert with this id.
    #[error("alert not found: {0}")]
    AlertNotFound(String),

    /// The order has already been settled.
    #[error("order {0} is already paid")]
    AlreadyPaid(String),

    /// The transaction reference was already used for a payment.
    #[error("transaction already used: {0}")]
    DuplicateTransaction(String),

    /// On-chain verification rejected the transaction.
    #[error("verification failed ({kind}): {reason}")]
    Verification {
        /// Failure category reported by the chain adapter.
        kind: VerifyErrorKind,
        /// Human readable detail.
        reason: String,
    },

    /// No chain adapter is registered for the currency.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),

    /// A compliance hold prevents the requested action.
    #[error("blocked by compliance: {0}")]
    ComplianceBlocked(String),

    /// Requested status change is not allowed from the current status.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Order contents are malformed (quantities, prices, totals).
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Not enough stock to settle the order.
    #[error("insufficient stock for product {product}: need {needed}, have {available}")]
    InsufficientStock {
        /// Product reference.
        product: String,
        /// Quantity required by the order.
        needed: u32,
        /// Quantity currently in stock.
        available: u32,
    },

    /// Entity with this id already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Chain data source error (malformed response, bad request).
    #[error("chain error: {0}")]
    Chain(String),

    /// Compliance evaluation error.
    #[error("compliance error: {0}")]
    Compliance(String),

    /// Conversion workflow error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a verification failure.
    pub fn verification(kind: VerifyErrorKind, reason: impl Into<String>) -> Self {
        Self::Verification {
            kind,
            reason: reason.into(),
        }
    }

    /// Whether the caller may resubmit the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Verification { kind, .. } => kind.is_retryable(),
            Self::InsufficientStock { .. } | Self::Io(_) => true,
            _ => false,
        }
    }

    /// HTTP status code a collaborator should surface for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::OrderNotFound(_) | Self::PaymentNotFound(_) | Self::AlertNotFound(_) => 404,
            Self::AlreadyPaid(_) | Self::DuplicateTransaction(_) | Self::AlreadyExists(_) => 409,
            Self::Verification { kind, .. } => kind.status_code(),
            Self::UnsupportedCurrency(_) | Self::InvalidOrder(_) | Self::Config(_) => 400,
            Self::ComplianceBlocked(_) => 403,
            Self::InvalidTransition(_) | Self::InsufficientStock { .. } | Self::Conversion(_) => {
                422
            }
            Self::Chain(_) => 502,
            Self::Compliance(_) | Self::Io(_) => 500,
        }
    }

    /// Short machine-readable kind, used in API error bodies.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderNotFound(_) | Self::PaymentNotFound(_) | Self::AlertNotFound(_) => {
                "not_found"
            }
            Self::AlreadyPaid(_) => "already_paid",
            Self::DuplicateTransaction(_) => "duplicate_transaction",
            Self::Verification { kind, .. } => kind.as_str(),
            Self::UnsupportedCurrency(_) => "unsupported_currency",
            Self::ComplianceBlocked(_) => "compliance_blocked",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::InvalidOrder(_) => "invalid_order",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::AlreadyExists(_) => "already_exists",
            Self::Config(_) => "config",
            Self::Chain(_) => "chain",
            Self::Compliance(_) => "compliance",
            Self::Conversion(_) => "conversion",
            Self::Io(_) => "io",
        }
    }
}
