//! Settlement ledger: the only writer of Order and Payment state.
//!
//! # Confirmation flow
//!
//! ```text
//! confirm_payment(order, tx)
//!        │
//!        ▼  (lock)
//! ┌──────────────────────────┐  order missing ──► OrderNotFound
//! │ load order, check status │  already settled ─► AlreadyPaid
//! │ reserve tx reference     │  tx seen/in use ──► DuplicateTransaction
//! └────────────┬─────────────┘
//!              │ (unlocked)
//!              ▼
//!      TransactionVerifier
//!              │
//!        ┌─────┴──────┬────────────────┐
//!     verified    rejected       unreachable
//!        │            │                │
//!        ▼  (lock)    ▼ (lock)         ▼
//!  payment=confirmed  payment=failed  release tx,
//!  order=paid         (auditable)     no record
//!  stock -= qty
//!        │
//!        ▼
//!  ComplianceQueue (fire and forget)
//! ```
//!
//! An unconfirmed transaction is recorded as a failed payment too. Submitting
//! the same reference again for the same order re-verifies that record rather
//! than tripping the duplicate check.
//!
//! The tx reference is reserved before the chain round-trip, so of two
//! concurrent requests carrying the same reference exactly one proceeds.
//! All writes of a settlement happen inside one critical section: either the
//! payment, the order status and every stock decrement land together, or none
//! of them do.

mod conversion;

pub use conversion::{ConversionStatus, ConversionTransaction, FeeBreakdown, StatusChange};

use crate::chain::{VerificationResult, VerifyErrorKind};
use crate::compliance::{ComplianceJob, ComplianceQueue, TransactionHistory};
use crate::error::{Error, Result};
use crate::event::{SettlementEvent, SettlementEventsSender};
use crate::model::{Order, OrderStatus, Payment, PaymentStatus, TransactionRecord};
use crate::verifier::TransactionVerifier;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Why fulfillment of a settled order is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    /// A critical alert blocked the settlement.
    Blocked,
    /// Alerts need manual review.
    ManualReview,
}

/// Compliance hold on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceHold {
    /// Reason.
    pub reason: HoldReason,
    /// Alerts that caused the hold.
    pub alert_ids: Vec<String>,
    /// When the hold was placed.
    pub placed_at: DateTime<Utc>,
}

#[derive(Default)]
struct LedgerState {
    orders: HashMap<String, Order>,
    payments: HashMap<String, Payment>,
    /// Transaction reference → payment id.
    by_tx_ref: HashMap<String, String>,
    /// Order id → payment ids in creation order.
    by_order: HashMap<String, Vec<String>>,
    /// References with a verification currently running.
    in_flight: HashSet<String>,
    stock: HashMap<String, u32>,
    holds: HashMap<String, ComplianceHold>,
}

impl LedgerState {
    fn insert_payment(&mut self, payment: Payment) {
        self.by_tx_ref
            .insert(payment.transaction_reference.clone(), payment.id.clone());
        self.by_order
            .entry(payment.order_id.clone())
            .or_default()
            .push(payment.id.clone());
        self.payments.insert(payment.id.clone(), payment);
    }

    /// Check stock for every line item, then apply the whole settlement.
    fn settle(&mut self, order_id: &str, payment: &mut Payment, result: &VerificationResult) -> Result<Order> {
        let order = self
            .orders
            .get(order_id)
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;

        let mut needed: HashMap<&str, u32> = HashMap::new();
        for item in &order.items {
            *needed.entry(item.product_id.as_str()).or_default() += item.quantity;
        }
        for (product, quantity) in &needed {
            let available = self.stock.get(*product).copied().unwrap_or(0);
            if available < *quantity {
                return Err(Error::InsufficientStock {
                    product: (*product).to_string(),
                    needed: *quantity,
                    available,
                });
            }
        }

        let decrements: Vec<(String, u32)> = needed
            .into_iter()
            .map(|(p, q)| (p.to_string(), q))
            .collect();
        for (product, quantity) in decrements {
            if let Some(level) = self.stock.get_mut(&product) {
                *level -= quantity;
            }
        }

        let now = Utc::now();
        payment.status = PaymentStatus::Confirmed;
        payment.amount = result.amount;
        payment.from_address.clone_from(&result.from_address);
        payment.confirmations = result.confirmations;
        payment.block_reference.clone_from(&result.block_reference);
        payment.failure_kind = None;
        payment.failure_reason = None;
        payment.confirmed_at = Some(now);
        payment.updated_at = now;

        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;
        order.status = OrderStatus::Paid;
        order.transaction_reference = Some(payment.transaction_reference.clone());
        order.paid_at = Some(now);
        order.updated_at = now;
        Ok(order.clone())
    }

    fn restock(&mut self, order: &Order) {
        for item in &order.items {
            *self.stock.entry(item.product_id.clone()).or_default() += item.quantity;
        }
    }
}

/// Canonical form of a transaction reference.
///
/// Hex references are case-insensitive on every supported chain, so they are
/// lowercased to stop a replay that only changes letter case.
#[must_use]
pub fn normalize_tx_ref(tx_ref: &str) -> String {
    let trimmed = tx_ref.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_hexdigit()) {
        trimmed.to_ascii_lowercase()
    } else {
        trimmed.to_string()
    }
}

/// Removes an in-flight reservation when the attempt ends, however it ends.
struct Reservation<'a> {
    state: &'a Mutex<LedgerState>,
    tx_ref: String,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.state.lock().in_flight.remove(&self.tx_ref);
    }
}

/// Idempotent state machine over orders, payments and inventory.
pub struct SettlementLedger {
    state: Mutex<LedgerState>,
    verifier: Arc<TransactionVerifier>,
    history: Arc<TransactionHistory>,
    events: Option<SettlementEventsSender>,
    compliance: Option<ComplianceQueue>,
}

impl SettlementLedger {
    /// Create a ledger that verifies through `verifier` and records into `history`.
    #[must_use]
    pub fn new(verifier: Arc<TransactionVerifier>, history: Arc<TransactionHistory>) -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            verifier,
            history,
            events: None,
            compliance: None,
        }
    }

    /// Emit events on `sender`.
    #[must_use]
    pub fn with_events(mut self, sender: SettlementEventsSender) -> Self {
        self.events = Some(sender);
        self
    }

    /// Hand confirmed settlements to `queue`.
    #[must_use]
    pub fn with_compliance(mut self, queue: ComplianceQueue) -> Self {
        self.compliance = Some(queue);
        self
    }

    fn emit(&self, event: SettlementEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    // -----------------------------------------------------------------------
    // Collaborator hand-off
    // -----------------------------------------------------------------------

    /// Accept an order created by the checkout collaborator.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is taken, the order has no items or no
    /// positive total, or it is not `pending`.
    pub fn register_order(&self, mut order: Order) -> Result<Order> {
        if order.items.is_empty() {
            return Err(Error::InvalidOrder(format!(
                "order {} has no line items",
                order.id
            )));
        }
        if order.total_crypto <= Decimal::ZERO || order.total_fiat.is_sign_negative() {
            return Err(Error::InvalidOrder(format!(
                "order {} must have a positive total",
                order.id
            )));
        }
        if order.status != OrderStatus::Pending {
            return Err(Error::InvalidTransition(format!(
                "order {} must be registered as pending, not {}",
                order.id, order.status
            )));
        }
        order.currency = crate::model::normalize_currency(&order.currency);
        order.transaction_reference = None;
        order.paid_at = None;

        let mut state = self.state.lock();
        if state.orders.contains_key(&order.id) {
            return Err(Error::AlreadyExists(format!("order {}", order.id)));
        }
        debug!("Registered order {} ({} {})", order.id, order.total_crypto, order.currency);
        state.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    /// Set the stock level of a product.
    pub fn set_stock(&self, product_id: &str, quantity: u32) {
        self.state.lock().stock.insert(product_id.to_string(), quantity);
    }

    /// Current stock level of a product.
    #[must_use]
    pub fn stock(&self, product_id: &str) -> u32 {
        self.state.lock().stock.get(product_id).copied().unwrap_or(0)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Look up an order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderNotFound`] if absent.
    pub fn order(&self, order_id: &str) -> Result<Order> {
        self.state
            .lock()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))
    }

    /// Look up a payment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PaymentNotFound`] if absent.
    pub fn payment(&self, payment_id: &str) -> Result<Payment> {
        self.state
            .lock()
            .payments
            .get(payment_id)
            .cloned()
            .ok_or_else(|| Error::PaymentNotFound(payment_id.to_string()))
    }

    /// All payment attempts recorded for an order, oldest first.
    #[must_use]
    pub fn payments_for_order(&self, order_id: &str) -> Vec<Payment> {
        let state = self.state.lock();
        state
            .by_order
            .get(order_id)
            .map(|ids| ids.iter().filter_map(|id| state.payments.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// The confirmed payment of an order, or its latest attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderNotFound`] for an unknown order and
    /// [`Error::PaymentNotFound`] when no attempt exists yet.
    pub fn payment_by_order(&self, order_id: &str) -> Result<Payment> {
        if !self.state.lock().orders.contains_key(order_id) {
            return Err(Error::OrderNotFound(order_id.to_string()));
        }
        let payments = self.payments_for_order(order_id);
        payments
            .iter()
            .find(|p| p.status == PaymentStatus::Confirmed)
            .or_else(|| payments.last())
            .cloned()
            .ok_or_else(|| Error::PaymentNotFound(format!("no payment for order {order_id}")))
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Verify `tx_ref` on-chain and settle `order_id` with it, at most once.
    ///
    /// # Errors
    ///
    /// * [`Error::OrderNotFound`] - unknown order
    /// * [`Error::AlreadyPaid`] - order already settled
    /// * [`Error::DuplicateTransaction`] - reference already used or in use
    /// * [`Error::Verification`] - chain rejected the transaction; a failed
    ///   payment is recorded unless the node was unreachable
    /// * [`Error::InsufficientStock`] - nothing written, may be retried
    ///
    /// Resubmitting a reference whose attempt for this order failed as
    /// unconfirmed re-verifies that payment instead of creating a new one.
    pub async fn confirm_payment(&self, order_id: &str, tx_ref: &str) -> Result<Payment> {
        let tx_ref = normalize_tx_ref(tx_ref);
        if tx_ref.is_empty() {
            return Err(Error::verification(
                VerifyErrorKind::NotFound,
                "empty transaction reference",
            ));
        }

        let order = {
            let mut state = self.state.lock();
            let order = state
                .orders
                .get(order_id)
                .cloned()
                .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;
            if order.status.is_settled() {
                return Err(Error::AlreadyPaid(order_id.to_string()));
            }
            if order.status != OrderStatus::Pending {
                return Err(Error::InvalidTransition(format!(
                    "order {order_id} is {} and cannot be paid",
                    order.status
                )));
            }
            let existing = state
                .by_tx_ref
                .get(&tx_ref)
                .and_then(|id| state.payments.get(id))
                .map(|p| {
                    let resumable = p.order_id == order_id
                        && p.status == PaymentStatus::Failed
                        && p.failure_kind.is_some_and(|k| k.is_retryable());
                    resumable.then(|| p.id.clone())
                });
            match existing {
                Some(Some(payment_id)) => Some(payment_id),
                Some(None) => {
                    warn!("Rejected replay of {tx_ref} for order {order_id}");
                    return Err(Error::DuplicateTransaction(tx_ref));
                }
                None => {
                    if !state.in_flight.insert(tx_ref.clone()) {
                        warn!("Rejected replay of {tx_ref} for order {order_id}");
                        return Err(Error::DuplicateTransaction(tx_ref));
                    }
                    None
                }
            }
            .map_or(Ok(order), Err)
        };
        // An unconfirmed attempt resubmitted for its own order continues on the same record.
        let order = match order {
            Ok(order) => order,
            Err(payment_id) => {
                debug!("Resuming unconfirmed payment {payment_id} for order {order_id}");
                return self.reverify_payment(&payment_id).await;
            }
        };
        let _reservation = Reservation {
            state: &self.state,
            tx_ref: tx_ref.clone(),
        };

        info!("Verifying {} {tx_ref} for order {order_id}", order.currency);
        let result = self
            .verifier
            .verify(
                &order.currency,
                &tx_ref,
                &order.payment_address,
                order.total_crypto,
            )
            .await;

        let now = Utc::now();
        let mut payment = Payment {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            user_id: order.user_id.clone(),
            transaction_reference: tx_ref.clone(),
            currency: order.currency.clone(),
            amount: order.total_crypto,
            amount_fiat: order.total_fiat,
            from_address: result.from_address.clone(),
            to_address: order.payment_address.clone(),
            status: PaymentStatus::Pending,
            confirmations: result.confirmations,
            block_reference: result.block_reference.clone(),
            verification_attempts: 1,
            failure_kind: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            confirmed_at: None,
        };

        if let Some(error) = result.error.clone() {
            return Err(self.record_rejection(&order, payment, &result, error.kind, error.reason));
        }

        let settled = {
            let mut state = self.state.lock();
            let current = state
                .orders
                .get(order_id)
                .map(|o| o.status)
                .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;
            if current == OrderStatus::Pending {
                state.settle(order_id, &mut payment, &result).map(|order| {
                    state.insert_payment(payment.clone());
                    order
                })
            } else {
                // Another reference settled the order while this one was verified.
                payment.status = PaymentStatus::Failed;
                payment.amount = result.amount;
                payment.failure_reason = Some(format!("order was already {current}"));
                state.insert_payment(payment.clone());
                Err(Error::AlreadyPaid(order_id.to_string()))
            }
        };

        let order = match settled {
            Ok(order) => order,
            Err(e) => {
                if matches!(e, Error::AlreadyPaid(_)) {
                    self.history.record(TransactionRecord::from_payment(&payment));
                }
                warn!("Settlement of order {order_id} with {tx_ref} aborted: {e}");
                return Err(e);
            }
        };

        self.after_settlement(&order, &payment);
        Ok(payment)
    }

    /// Record (or not) a rejected verification and build the caller's error.
    fn record_rejection(
        &self,
        order: &Order,
        mut payment: Payment,
        result: &VerificationResult,
        kind: VerifyErrorKind,
        reason: String,
    ) -> Error {
        if kind.persists_failure() {
            payment.status = PaymentStatus::Failed;
            if !result.amount.is_zero() {
                payment.amount = result.amount;
            }
            payment.failure_kind = Some(kind);
            payment.failure_reason = Some(reason.clone());
            self.state.lock().insert_payment(payment.clone());
            self.history.record(TransactionRecord::from_payment(&payment));
            warn!(
                "Payment {} for order {} failed verification ({kind}): {reason}",
                payment.transaction_reference, order.id
            );
            self.emit(SettlementEvent::PaymentFailed {
                order_id: order.id.clone(),
                payment_id: payment.id,
                reason: reason.clone(),
            });
        } else {
            info!(
                "Verification of {} for order {} is retryable ({kind}): {reason}",
                payment.transaction_reference, order.id
            );
        }
        Error::verification(kind, reason)
    }

    fn after_settlement(&self, order: &Order, payment: &Payment) {
        info!(
            "Order {} paid with {} ({} {}, {} confirmations)",
            order.id, payment.transaction_reference, payment.amount, payment.currency, payment.confirmations
        );
        self.history.record(TransactionRecord::from_payment(payment));
        self.emit(SettlementEvent::PaymentConfirmed {
            order_id: order.id.clone(),
            payment_id: payment.id.clone(),
            tx_reference: payment.transaction_reference.clone(),
        });
        self.emit(SettlementEvent::OrderStatusChanged {
            order_id: order.id.clone(),
            status: OrderStatus::Paid,
        });
        if let Some(queue) = &self.compliance {
            queue.submit(ComplianceJob {
                order: order.clone(),
                payment: payment.clone(),
            });
        }
    }

    /// Re-run verification for a stored payment (admin action).
    ///
    /// The attempt counter of the same record is incremented. A failed payment
    /// that now verifies settles its order if the order is still pending. A
    /// confirmed payment never goes back to failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PaymentNotFound`], [`Error::DuplicateTransaction`] when
    /// the reference is being verified concurrently, [`Error::AlreadyPaid`]
    /// when the order was settled by another reference,
    /// [`Error::InvalidTransition`] when it was cancelled or refunded, or the
    /// verification error. The chain is always asked again; cached results
    /// are not reused.
    pub async fn reverify_payment(&self, payment_id: &str) -> Result<Payment> {
        let (payment, order) = {
            let mut state = self.state.lock();
            let payment = state
                .payments
                .get(payment_id)
                .cloned()
                .ok_or_else(|| Error::PaymentNotFound(payment_id.to_string()))?;
            let order = state
                .orders
                .get(&payment.order_id)
                .cloned()
                .ok_or_else(|| Error::OrderNotFound(payment.order_id.clone()))?;
            if !state.in_flight.insert(payment.transaction_reference.clone()) {
                return Err(Error::DuplicateTransaction(payment.transaction_reference));
            }
            (payment, order)
        };
        let _reservation = Reservation {
            state: &self.state,
            tx_ref: payment.transaction_reference.clone(),
        };

        info!(
            "Re-verifying payment {payment_id} ({} {})",
            payment.currency, payment.transaction_reference
        );
        let result = self
            .verifier
            .verify_fresh(
                &order.currency,
                &payment.transaction_reference,
                &order.payment_address,
                order.total_crypto,
            )
            .await;

        let mut state = self.state.lock();
        let mut updated = state
            .payments
            .get(payment_id)
            .cloned()
            .ok_or_else(|| Error::PaymentNotFound(payment_id.to_string()))?;
        updated.verification_attempts += 1;
        updated.updated_at = Utc::now();

        if let Some(error) = result.error.clone() {
            if updated.status == PaymentStatus::Failed && error.kind.persists_failure() {
                updated.failure_kind = Some(error.kind);
                updated.failure_reason = Some(error.reason.clone());
            }
            if updated.status == PaymentStatus::Confirmed {
                warn!(
                    "Confirmed payment {payment_id} no longer verifies ({}): {}",
                    error.kind, error.reason
                );
            }
            state.payments.insert(updated.id.clone(), updated);
            return Err(Error::verification(error.kind, error.reason));
        }

        match updated.status {
            PaymentStatus::Confirmed | PaymentStatus::Pending => {
                updated.confirmations = result.confirmations;
                updated.block_reference.clone_from(&result.block_reference);
                state.payments.insert(updated.id.clone(), updated.clone());
                Ok(updated)
            }
            PaymentStatus::Failed => {
                let current = state
                    .orders
                    .get(&updated.order_id)
                    .map(|o| o.status)
                    .ok_or_else(|| Error::OrderNotFound(updated.order_id.clone()))?;
                if current != OrderStatus::Pending {
                    updated.failure_reason = Some(format!("order was already {current}"));
                    state.payments.insert(updated.id.clone(), updated);
                    if current.is_settled() {
                        return Err(Error::AlreadyPaid(order.id));
                    }
                    return Err(Error::InvalidTransition(format!(
                        "order {} is {current} and cannot be paid",
                        order.id
                    )));
                }
                let order_id = updated.order_id.clone();
                match state.settle(&order_id, &mut updated, &result) {
                    Ok(settled) => {
                        state.payments.insert(updated.id.clone(), updated.clone());
                        drop(state);
                        self.after_settlement(&settled, &updated);
                        Ok(updated)
                    }
                    Err(e) => {
                        // Keep the attempt count, but not the half-applied status.
                        let mut failed = updated;
                        failed.status = PaymentStatus::Failed;
                        failed.confirmed_at = None;
                        state.payments.insert(failed.id.clone(), failed);
                        Err(e)
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Fulfillment
    // -----------------------------------------------------------------------

    fn transition(&self, order_id: &str, next: OrderStatus) -> Result<Order> {
        let order = {
            let mut state = self.state.lock();
            let hold = state.holds.get(order_id).map(|h| h.reason);
            let order = state
                .orders
                .get_mut(order_id)
                .ok_or_else(|| Error::OrderNotFound(order_id.to_string()))?;
            if !order.status.can_transition_to(next) {
                return Err(Error::InvalidTransition(format!(
                    "order {order_id}: {} -> {next}",
                    order.status
                )));
            }
            if matches!(next, OrderStatus::Shipped | OrderStatus::Delivered) {
                if let Some(reason) = hold {
                    return Err(Error::ComplianceBlocked(format!(
                        "order {order_id} is held for {reason:?}"
                    )));
                }
            }
            let restock = order.status == OrderStatus::Paid
                && matches!(next, OrderStatus::Cancelled | OrderStatus::Refunded);
            order.status = next;
            order.updated_at = Utc::now();
            let order = order.clone();
            if restock {
                state.restock(&order);
            }
            order
        };
        info!("Order {order_id} is now {next}");
        self.emit(SettlementEvent::OrderStatusChanged {
            order_id: order_id.to_string(),
            status: next,
        });
        Ok(order)
    }

    /// `paid → processing`.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is missing or not paid.
    pub fn mark_processing(&self, order_id: &str) -> Result<Order> {
        self.transition(order_id, OrderStatus::Processing)
    }

    /// `processing → shipped`; refused while a compliance hold is active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ComplianceBlocked`] for held orders, or a transition error.
    pub fn mark_shipped(&self, order_id: &str) -> Result<Order> {
        self.transition(order_id, OrderStatus::Shipped)
    }

    /// `shipped|processing → delivered`; refused while a compliance hold is active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ComplianceBlocked`] for held orders, or a transition error.
    pub fn mark_delivered(&self, order_id: &str) -> Result<Order> {
        self.transition(order_id, OrderStatus::Delivered)
    }

    /// Cancel a pending or paid order, restocking a paid one.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is missing or past `paid`.
    pub fn cancel(&self, order_id: &str) -> Result<Order> {
        self.transition(order_id, OrderStatus::Cancelled)
    }

    /// Refund a pending or paid order, restocking a paid one.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is missing or past `paid`.
    pub fn refund(&self, order_id: &str) -> Result<Order> {
        self.transition(order_id, OrderStatus::Refunded)
    }

    // -----------------------------------------------------------------------
    // Compliance holds
    // -----------------------------------------------------------------------

    /// Withhold fulfillment of an order.
    pub fn place_hold(&self, order_id: &str, reason: HoldReason, alert_ids: Vec<String>) {
        let mut state = self.state.lock();
        // A block is never downgraded to a review hold.
        if let Some(existing) = state.holds.get(order_id) {
            if existing.reason == HoldReason::Blocked && reason == HoldReason::ManualReview {
                return;
            }
        }
        warn!("Compliance hold ({reason:?}) on order {order_id}");
        state.holds.insert(
            order_id.to_string(),
            ComplianceHold {
                reason,
                alert_ids,
                placed_at: Utc::now(),
            },
        );
    }

    /// Current hold on an order.
    #[must_use]
    pub fn hold(&self, order_id: &str) -> Option<ComplianceHold> {
        self.state.lock().holds.get(order_id).cloned()
    }

    /// Lift a hold. Returns whether one was present.
    pub fn release_hold(&self, order_id: &str) -> bool {
        let released = self.state.lock().holds.remove(order_id).is_some();
        if released {
            info!("Compliance hold on order {order_id} released");
        }
        released
    }
}
