//! Background evaluation of settled payments.

use super::alerts::AlertStore;
use super::directory::UserDirectory;
use super::gate::{ComplianceDecision, ComplianceGate, ScreenedTransaction};
use super::history::TransactionHistory;
use crate::config::ComplianceConfig;
use crate::error::{Error, Result};
use crate::event::{SettlementEvent, SettlementEventsSender};
use crate::ledger::{HoldReason, SettlementLedger};
use crate::model::{Order, Payment};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// A confirmed settlement waiting for evaluation.
#[derive(Debug, Clone)]
pub struct ComplianceJob {
    /// Paid order.
    pub order: Order,
    /// Confirmed payment.
    pub payment: Payment,
}

/// Sending half of the compliance channel.
#[derive(Debug, Clone)]
pub struct ComplianceQueue {
    tx: mpsc::Sender<ComplianceJob>,
}

impl ComplianceQueue {
    /// Create a queue holding up to `depth` jobs.
    #[must_use]
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<ComplianceJob>) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        (Self { tx }, rx)
    }

    /// Hand a job to the worker without waiting for it.
    ///
    /// A full queue defers the send to a task so the settlement response is
    /// never held up.
    pub fn submit(&self, job: ComplianceJob) {
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!("Compliance queue full, deferring order {}", job.order.id);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let order_id = job.order.id.clone();
                    if tx.send(job).await.is_err() {
                        error!("Compliance worker gone, order {order_id} was not evaluated");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                error!(
                    "Compliance worker gone, order {} was not evaluated",
                    job.order.id
                );
            }
        }
    }
}

/// Consumes [`ComplianceJob`]s, evaluates them and records the outcome.
pub struct ComplianceWorker {
    rx: mpsc::Receiver<ComplianceJob>,
    gate: Arc<ComplianceGate>,
    directory: Arc<dyn UserDirectory>,
    history: Arc<TransactionHistory>,
    alerts: Arc<AlertStore>,
    ledger: Arc<SettlementLedger>,
    events: Option<SettlementEventsSender>,
    max_attempts: u32,
    backoff: Duration,
}

impl ComplianceWorker {
    /// Create a worker reading from `rx`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rx: mpsc::Receiver<ComplianceJob>,
        gate: Arc<ComplianceGate>,
        directory: Arc<dyn UserDirectory>,
        history: Arc<TransactionHistory>,
        alerts: Arc<AlertStore>,
        ledger: Arc<SettlementLedger>,
        config: &ComplianceConfig,
    ) -> Self {
        Self {
            rx,
            gate,
            directory,
            history,
            alerts,
            ledger,
            events: None,
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Emit events on `sender`.
    #[must_use]
    pub fn with_events(mut self, sender: SettlementEventsSender) -> Self {
        self.events = Some(sender);
        self
    }

    fn emit(&self, event: SettlementEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Process jobs until the channel closes or shutdown is signalled.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Compliance worker started");
        loop {
            tokio::select! {
                job = self.rx.recv() => {
                    let Some(job) = job else { break };
                    self.process(job).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Compliance worker stopped");
    }

    /// Evaluate one job with retries.
    pub async fn process(&self, job: ComplianceJob) {
        let order_id = job.order.id.clone();
        let mut attempt = 1;
        loop {
            match self.evaluate(&job).await {
                Ok(decision) => {
                    self.apply(&job, decision);
                    return;
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        "Compliance evaluation of order {order_id} failed (attempt {attempt}/{}): {e}",
                        self.max_attempts
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        "Compliance evaluation of order {order_id} ({}) gave up after {attempt} attempts: {e}",
                        job.payment.transaction_reference
                    );
                    self.emit(SettlementEvent::ComplianceFailed {
                        order_id,
                        message: e.to_string(),
                    });
                    return;
                }
            }
        }
    }

    async fn evaluate(&self, job: &ComplianceJob) -> Result<ComplianceDecision> {
        let user_id = &job.payment.user_id;
        let profile = self
            .directory
            .profile(user_id)
            .await?
            .ok_or_else(|| Error::Compliance(format!("no profile for user {user_id}")))?;
        let history = self.history.prior_to(user_id, &job.payment.id);
        let tx = ScreenedTransaction::from_payment(&job.payment);
        Ok(self.gate.evaluate(&tx, &profile, &history))
    }

    fn apply(&self, job: &ComplianceJob, decision: ComplianceDecision) {
        let order_id = &job.order.id;
        let mut alert_ids = Vec::with_capacity(decision.alerts.len());
        for alert in &decision.alerts {
            let alert = self.alerts.insert(alert.clone());
            warn!(
                "Alert {} ({}, {:?}) raised for order {order_id}",
                alert.id,
                alert.alert_type.as_str(),
                alert.severity
            );
            self.emit(SettlementEvent::AlertRaised {
                alert_id: alert.id.clone(),
                alert_type: alert.alert_type,
                severity: alert.severity,
            });
            alert_ids.push(alert.id);
        }

        if !decision.allowed {
            self.ledger.place_hold(order_id, HoldReason::Blocked, alert_ids);
        } else if decision.requires_review {
            self.ledger
                .place_hold(order_id, HoldReason::ManualReview, alert_ids);
        } else {
            debug!("Order {order_id} cleared compliance");
        }

        info!(
            "Compliance decision for order {order_id} ({}): allowed={}, review={}, risk={} ({})",
            job.payment.transaction_reference,
            decision.allowed,
            decision.requires_review,
            decision.risk.total,
            decision.risk.level
        );
        let (allowed, requires_review) = (decision.allowed, decision.requires_review);
        self.alerts.record_decision(order_id, decision);
        self.emit(SettlementEvent::ComplianceEvaluated {
            order_id: order_id.clone(),
            allowed,
            requires_review,
        });
    }
}
