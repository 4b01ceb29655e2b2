//! Test harness: a full service wired to an in-memory chain.

use async_trait::async_trait;
use cryptopay_settlement::chain::{ChainAdapter, ChainKind, VerificationResult, VerifyErrorKind};
use cryptopay_settlement::model::{LineItem, Order, UserProfile};
use cryptopay_settlement::service::{NewOrder, RunningService, SettlementService};
use cryptopay_settlement::{Result, ServiceBuilder, ServiceConfig, SettlementEvent};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Merchant address used by every test order.
pub const MERCHANT: &str = "bc1qmerchantxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";

/// Chain whose transactions are scripted by the test.
pub struct FakeChain {
    transactions: Mutex<HashMap<String, VerificationResult>>,
    delay: Duration,
}

impl FakeChain {
    /// Create a chain answering after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            delay,
        }
    }

    /// Script a confirmed transfer of `amount` to the merchant.
    pub fn pay(&self, tx_ref: &str, amount: Decimal) {
        self.transactions.lock().insert(
            tx_ref.to_string(),
            VerificationResult {
                verified: true,
                amount,
                from_address: Some("bc1qcustomer".into()),
                to_address: Some(MERCHANT.into()),
                confirmations: 3,
                block_reference: Some(format!("block-{tx_ref}")),
                error: None,
            },
        );
    }

    /// Script a failure.
    pub fn fail(&self, tx_ref: &str, kind: VerifyErrorKind, reason: &str) {
        self.transactions
            .lock()
            .insert(tx_ref.to_string(), VerificationResult::failure(kind, reason));
    }
}

#[async_trait]
impl ChainAdapter for FakeChain {
    fn kind(&self) -> ChainKind {
        ChainKind::Utxo
    }

    fn currency(&self) -> &str {
        "BTC"
    }

    fn min_confirmations(&self) -> u64 {
        1
    }

    async fn verify(&self, tx_ref: &str, expected_address: &str, _amount: Decimal) -> VerificationResult {
        tokio::time::sleep(self.delay).await;
        let scripted = self.transactions.lock().get(tx_ref).cloned();
        match scripted {
            Some(result) if result.verified && expected_address != MERCHANT => {
                VerificationResult::failure(VerifyErrorKind::AddressMismatch, "paid elsewhere")
            }
            Some(result) => result,
            None => VerificationResult::failure(VerifyErrorKind::NotFound, "unknown transaction"),
        }
    }
}

/// A built service plus its scripted chain.
pub struct TestHarness {
    /// Running service (HTTP not started).
    pub running: RunningService,
    /// Shared handle.
    pub service: SettlementService,
    /// Scripted chain.
    pub chain: Arc<FakeChain>,
}

impl TestHarness {
    /// Build a service with default compliance settings.
    pub async fn setup() -> Result<Self> {
        Self::setup_with_delay(Duration::ZERO).await
    }

    /// Build a service whose chain answers after `delay`.
    pub async fn setup_with_delay(delay: Duration) -> Result<Self> {
        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".parse().map_err(|_| {
                cryptopay_settlement::Error::Config("bad test address".into())
            })?,
            ..ServiceConfig::default()
        };
        config.compliance.retry_backoff_ms = 10;

        let chain = Arc::new(FakeChain::new(delay));
        let running = ServiceBuilder::new(config)
            .with_adapter(Arc::clone(&chain) as Arc<dyn ChainAdapter>)
            .build()
            .await?;
        let service = running.handle();
        Ok(Self {
            running,
            service,
            chain,
        })
    }

    /// Register a user profile.
    pub fn user(&self, id: &str, name: &str, country: &str) {
        self.service.upsert_user(UserProfile {
            id: id.into(),
            name: name.into(),
            country: country.into(),
            registered_at: Utc::now(),
        });
    }

    /// Register a BTC order for `quantity` units of `product`.
    pub fn order(
        &self,
        id: &str,
        user: &str,
        product: &str,
        quantity: u32,
        unit_crypto: Decimal,
        unit_fiat: Decimal,
    ) -> Result<Order> {
        self.service.register_order(NewOrder {
            id: Some(id.into()),
            user_id: user.into(),
            items: vec![LineItem {
                product_id: product.into(),
                quantity,
                unit_price_crypto: unit_crypto,
                unit_price_fiat: unit_fiat,
            }],
            currency: "btc".into(),
            payment_address: Some(MERCHANT.into()),
        })
    }
}

/// Wait for the compliance decision of `order_id`, returning `(allowed, requires_review)`.
pub async fn wait_for_evaluation(
    events: &mut broadcast::Receiver<SettlementEvent>,
    order_id: &str,
) -> (bool, bool) {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(SettlementEvent::ComplianceEvaluated {
                    order_id: id,
                    allowed,
                    requires_review,
                }) if id == order_id => return (allowed, requires_review),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("compliance evaluation did not finish")
}
