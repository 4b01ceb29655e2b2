//! # cryptopay-settlement
//!
//! Payment verification, exactly-once settlement and AML compliance for a
//! marketplace that accepts cryptocurrency.
//!
//! ## Architecture
//!
//! ```text
//! client ──confirm(order, tx)──► SettlementLedger ──► TransactionVerifier
//!                                     │                  ├ UtxoAdapter    (Esplora)
//!                                     │                  ├ AccountAdapter (JSON-RPC)
//!                                     │                  └ TokenAdapter   (JSON-RPC logs)
//!                                     │
//!                                     ├─ payment + order + stock, one commit
//!                                     │
//!                                     └─► ComplianceQueue ──► ComplianceWorker
//!                                                              ├ sanctions screening
//!                                                              ├ RiskScoringEngine
//!                                                              ├ PatternDetector
//!                                                              └ alerts, holds
//! ```
//!
//! A transaction reference settles at most one order. Compliance runs after
//! the commit and can only hold shipment, never undo a settlement.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cryptopay_settlement::{ServiceBuilder, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> cryptopay_settlement::Result<()> {
//!     let config = ServiceConfig::default();
//!     let mut service = ServiceBuilder::new(config).build().await?;
//!     service.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod chain;
pub mod compliance;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod model;
pub mod risk;
pub mod service;
pub mod verifier;

pub use chain::{ChainAdapter, ChainKind, VerificationResult, VerifyErrorKind};
pub use compliance::{AlertStore, ComplianceDecision, ComplianceGate, PatternDetector};
pub use config::{ChainConfig, ComplianceConfig, RiskConfig, ServiceConfig};
pub use error::{Error, Result};
pub use event::{SettlementEvent, SettlementEventsChannel};
pub use ledger::{ConversionTransaction, HoldReason, SettlementLedger};
pub use model::{Alert, Order, OrderStatus, Payment, PaymentStatus, UserProfile};
pub use risk::{RiskAssessment, RiskLevel, RiskScoringEngine};
pub use service::{NewOrder, RunningService, ServiceBuilder, SettlementService};
pub use verifier::TransactionVerifier;
