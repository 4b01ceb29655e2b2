//! Post-settlement compliance pipeline.
//!
//! ```text
//!   SettlementLedger ──submit──► ComplianceQueue (bounded mpsc)
//!                                      │
//!                                      ▼
//!                              ComplianceWorker
//!                     ┌────────────────┼───────────────────┐
//!                UserDirectory   TransactionHistory    ComplianceGate
//!                                                     ├ sanctions screening
//!                                                     ├ RiskScoringEngine
//!                                                     └ PatternDetector
//!                                      │
//!                         AlertStore + hold on the order
//! ```
//!
//! Compliance runs after the settlement has committed and never rolls it
//! back. Its only effect on settlement state is a hold that stops shipment.

mod alerts;
mod directory;
mod gate;
mod history;
mod patterns;
mod screening;
mod worker;

pub use alerts::{AlertFilter, AlertStore};
pub use directory::{InMemoryUserDirectory, UserDirectory};
pub use gate::{ComplianceDecision, ComplianceGate, ScreenedTransaction};
pub use history::TransactionHistory;
pub use patterns::{AnomalyFinding, PatternDetector, RapidSuccessionFinding, StructuringFinding};
pub use screening::{SanctionsScreener, ScreeningAction, ScreeningOutcome, ScreeningResult};
pub use worker::{ComplianceJob, ComplianceQueue, ComplianceWorker};
