//! Service wiring and lifecycle.

use crate::chain::ChainAdapter;
use crate::compliance::{
    AlertFilter, AlertStore, ComplianceDecision, ComplianceGate, ComplianceQueue,
    ComplianceWorker, InMemoryUserDirectory, TransactionHistory, UserDirectory,
};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::event::{
    create_event_channel, SettlementEvent, SettlementEventsChannel, SettlementEventsSender,
};
use crate::ledger::{ComplianceHold, HoldReason, SettlementLedger};
use crate::model::{Alert, LineItem, Order, Payment, UserProfile};
use crate::verifier::TransactionVerifier;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Order as handed over by the checkout collaborator.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    /// Order id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Purchasing user.
    pub user_id: String,
    /// Line items.
    pub items: Vec<LineItem>,
    /// Cryptocurrency code.
    pub currency: String,
    /// Receiving address; defaults to the configured one for the currency.
    #[serde(default)]
    pub payment_address: Option<String>,
}

/// Compliance view of one order.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceStatus {
    /// Order id.
    pub order_id: String,
    /// Latest decision, once evaluated.
    pub decision: Option<ComplianceDecision>,
    /// Active hold.
    pub hold: Option<ComplianceHold>,
    /// Alerts raised for the order.
    pub alerts: Vec<Alert>,
}

/// Shared handle to every component, cheap to clone.
#[derive(Clone)]
pub struct SettlementService {
    config: Arc<ServiceConfig>,
    verifier: Arc<TransactionVerifier>,
    ledger: Arc<SettlementLedger>,
    alerts: Arc<AlertStore>,
    users: Arc<InMemoryUserDirectory>,
    events_tx: SettlementEventsSender,
}

impl SettlementService {
    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Transaction verifier.
    #[must_use]
    pub fn verifier(&self) -> &Arc<TransactionVerifier> {
        &self.verifier
    }

    /// Settlement ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<SettlementLedger> {
        &self.ledger
    }

    /// Alert store.
    #[must_use]
    pub fn alerts(&self) -> &Arc<AlertStore> {
        &self.alerts
    }

    /// Subscribe to settlement events.
    #[must_use]
    pub fn subscribe_events(&self) -> SettlementEventsChannel {
        self.events_tx.subscribe()
    }

    /// Register an order for a supported currency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedCurrency`] if no adapter handles the
    /// currency, [`Error::Config`] if no payment address is known,
    /// [`Error::InvalidOrder`] for malformed line items, or a ledger error.
    pub fn register_order(&self, new: NewOrder) -> Result<Order> {
        if !self.verifier.supports(&new.currency) {
            return Err(Error::UnsupportedCurrency(new.currency));
        }
        let address = match new.payment_address {
            Some(address) if !address.trim().is_empty() => address,
            _ => self
                .config
                .payment_address(&new.currency)
                .map(str::to_string)
                .ok_or_else(|| {
                    Error::Config(format!("no payment address for {}", new.currency))
                })?,
        };
        let id = new
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let order = Order::new(id, new.user_id, new.items, new.currency, address)?;
        self.ledger.register_order(order)
    }

    /// Insert or replace a user profile.
    pub fn upsert_user(&self, profile: UserProfile) {
        self.users.upsert(profile);
    }

    /// Settle an order with an on-chain transaction.
    ///
    /// # Errors
    ///
    /// See [`SettlementLedger::confirm_payment`].
    pub async fn confirm_payment(&self, order_id: &str, tx_ref: &str) -> Result<Payment> {
        self.ledger.confirm_payment(order_id, tx_ref).await
    }

    /// Compliance decision, hold and alerts of an order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderNotFound`] for an unknown order.
    pub fn compliance_status(&self, order_id: &str) -> Result<ComplianceStatus> {
        self.ledger.order(order_id)?;
        Ok(ComplianceStatus {
            order_id: order_id.to_string(),
            decision: self.alerts.decision(order_id),
            hold: self.ledger.hold(order_id),
            alerts: self.alerts.list(&AlertFilter {
                order_id: Some(order_id.to_string()),
                ..AlertFilter::default()
            }),
        })
    }

    /// Resolve an alert, releasing the order's review hold once all its
    /// alerts are closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is missing or already closed.
    pub fn resolve_alert(&self, alert_id: &str, resolved_by: &str, note: &str) -> Result<Alert> {
        let alert = self.alerts.resolve(alert_id, resolved_by, note)?;
        self.release_if_cleared(&alert);
        Ok(alert)
    }

    /// File a report for an alert, releasing the order's review hold once all
    /// its alerts are closed.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is missing or already closed.
    pub fn file_alert(&self, alert_id: &str, filed_by: &str, note: &str) -> Result<Alert> {
        let alert = self.alerts.file(alert_id, filed_by, note)?;
        self.release_if_cleared(&alert);
        Ok(alert)
    }

    fn release_if_cleared(&self, alert: &Alert) {
        let Some(order_id) = alert.order_id.as_deref() else {
            return;
        };
        let Some(hold) = self.ledger.hold(order_id) else {
            return;
        };
        if hold.reason == HoldReason::Blocked {
            warn!("Order {order_id} stays blocked after alert {} closed", alert.id);
            return;
        }
        if self.alerts.all_closed_for_order(order_id) {
            self.ledger.release_hold(order_id);
        }
    }
}

/// Builder for constructing the settlement service.
pub struct ServiceBuilder {
    config: ServiceConfig,
    adapters: Vec<Arc<dyn ChainAdapter>>,
}

impl ServiceBuilder {
    /// Create a new builder with the given configuration.
    #[must_use]
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            adapters: Vec::new(),
        }
    }

    /// Register an extra adapter, replacing a configured one for the same currency.
    #[must_use]
    pub fn with_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    /// Wire every component, start the compliance worker and bind the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the listen address
    /// cannot be bound.
    pub async fn build(self) -> Result<RunningService> {
        info!("Building settlement service with config: {:?}", self.config);

        let mut verifier = TransactionVerifier::from_config(&self.config)?;
        for adapter in self.adapters {
            verifier.register(adapter);
        }
        let verifier = Arc::new(verifier);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let history = Arc::new(TransactionHistory::new());
        let (queue, jobs) = ComplianceQueue::channel(self.config.compliance.worker_queue_depth);
        let ledger = Arc::new(
            SettlementLedger::new(Arc::clone(&verifier), Arc::clone(&history))
                .with_events(events_tx.clone())
                .with_compliance(queue),
        );

        let alerts = Arc::new(AlertStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let directory: Arc<dyn UserDirectory> = users.clone();
        let worker = ComplianceWorker::new(
            jobs,
            Arc::new(ComplianceGate::new(&self.config.compliance, &self.config.risk)),
            directory,
            history,
            Arc::clone(&alerts),
            Arc::clone(&ledger),
            &self.config.compliance,
        )
        .with_events(events_tx.clone());
        let worker = tokio::spawn(worker.run(shutdown_rx.clone()));

        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let handle = SettlementService {
            config: Arc::new(self.config),
            verifier,
            ledger,
            alerts,
            users,
            events_tx: events_tx.clone(),
        };

        Ok(RunningService {
            handle,
            listener: Some(listener),
            local_addr,
            shutdown_tx,
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
            worker: Some(worker),
        })
    }
}

/// A running settlement service.
pub struct RunningService {
    handle: SettlementService,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: SettlementEventsSender,
    events_rx: Option<SettlementEventsChannel>,
    worker: Option<JoinHandle<()>>,
}

impl RunningService {
    /// Shared handle to the service components.
    #[must_use]
    pub fn handle(&self) -> SettlementService {
        self.handle.clone()
    }

    /// Address the HTTP listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get a receiver for settlement events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<SettlementEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to settlement events.
    #[must_use]
    pub fn subscribe_events(&self) -> SettlementEventsChannel {
        self.events_tx.subscribe()
    }

    /// Serve HTTP until shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the service was already run or the server fails.
    pub async fn run(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::Config("service already ran".into()))?;
        info!("Settlement service listening on {}", self.local_addr);
        let _ = self.events_tx.send(SettlementEvent::Started);

        let app = crate::api::router(self.handle.clone());
        let mut server_shutdown = self.shutdown_rx.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    while server_shutdown.changed().await.is_ok() {
                        if *server_shutdown.borrow() {
                            break;
                        }
                    }
                })
                .await
        });

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                    self.shutdown();
                    break;
                }
            }
        }

        let _ = self.events_tx.send(SettlementEvent::ShuttingDown);
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("HTTP server error: {e}"),
            Err(e) => warn!("HTTP server task failed: {e}"),
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        info!("Settlement service shutdown complete");
        Ok(())
    }

    /// Request the service to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
