//! Settlement event system.

use crate::model::{AlertType, OrderStatus, Severity};
use tokio::sync::broadcast;

/// Events emitted by the settlement service.
#[derive(Debug, Clone)]
pub enum SettlementEvent {
    /// Service has started successfully.
    Started,

    /// Service is shutting down.
    ShuttingDown,

    /// A payment was verified and the order settled.
    PaymentConfirmed {
        /// Order id.
        order_id: String,
        /// Payment id.
        payment_id: String,
        /// Transaction reference.
        tx_reference: String,
    },

    /// A payment attempt was rejected and recorded.
    PaymentFailed {
        /// Order id.
        order_id: String,
        /// Payment id.
        payment_id: String,
        /// Rejection reason.
        reason: String,
    },

    /// An order moved to a new status.
    OrderStatusChanged {
        /// Order id.
        order_id: String,
        /// New status.
        status: OrderStatus,
    },

    /// Compliance evaluation finished for a settlement.
    ComplianceEvaluated {
        /// Order id.
        order_id: String,
        /// Whether the settlement may be fulfilled without review.
        allowed: bool,
        /// Whether manual review is required.
        requires_review: bool,
    },

    /// An alert was raised.
    AlertRaised {
        /// Alert id.
        alert_id: String,
        /// Pattern.
        alert_type: AlertType,
        /// Severity.
        severity: Severity,
    },

    /// Compliance evaluation gave up after retries.
    ComplianceFailed {
        /// Order id.
        order_id: String,
        /// Last error.
        message: String,
    },
}

/// Channel for receiving settlement events.
pub type SettlementEventsChannel = broadcast::Receiver<SettlementEvent>;

/// Sender for settlement events.
pub type SettlementEventsSender = broadcast::Sender<SettlementEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (SettlementEventsSender, SettlementEventsChannel) {
    broadcast::channel(256)
}
