//! Settlement scenarios: happy path, replay, concurrency and failure handling.

use super::{TestHarness, MERCHANT};
use cryptopay_settlement::chain::VerifyErrorKind;
use cryptopay_settlement::{Error, OrderStatus, PaymentStatus};
use futures::future::join_all;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn test_happy_path_two_units() {
    let h = TestHarness::setup().await.unwrap();
    h.service.ledger().set_stock("widget", 10);
    let order = h
        .order("order-1", "alice", "widget", 2, dec!(0.005), dec!(250))
        .unwrap();
    assert_eq!(order.total_crypto, dec!(0.01));
    assert_eq!(order.total_fiat, dec!(500));
    assert_eq!(order.currency, "BTC");

    h.chain.pay("aa11", dec!(0.01));
    let payment = h.service.confirm_payment("order-1", "aa11").await.unwrap();

    assert_eq!(payment.status, PaymentStatus::Confirmed);
    assert_eq!(payment.to_address, MERCHANT);
    assert_eq!(payment.verification_attempts, 1);
    let order = h.service.ledger().order("order-1").unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.transaction_reference.as_deref(), Some("aa11"));
    assert_eq!(h.service.ledger().stock("widget"), 8);
}

#[tokio::test]
async fn test_replay_on_another_order_is_rejected() {
    let h = TestHarness::setup().await.unwrap();
    h.service.ledger().set_stock("widget", 10);
    h.order("order-a", "alice", "widget", 1, dec!(0.01), dec!(500))
        .unwrap();
    h.order("order-b", "bob", "widget", 1, dec!(0.01), dec!(500))
        .unwrap();
    h.chain.pay("bb22", dec!(0.01));

    h.service.confirm_payment("order-a", "bb22").await.unwrap();
    let err = h
        .service
        .confirm_payment("order-b", "bb22")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateTransaction(_)));
    assert_eq!(err.status_code(), 409);
    assert!(err.to_string().contains("transaction already used"));
    assert_eq!(
        h.service.ledger().order("order-b").unwrap().status,
        OrderStatus::Pending
    );
    assert_eq!(h.service.ledger().stock("widget"), 9);
}

#[tokio::test]
async fn test_concurrent_confirmations_single_winner() {
    let h = TestHarness::setup_with_delay(Duration::from_millis(25))
        .await
        .unwrap();
    h.service.ledger().set_stock("widget", 100);
    for i in 0..8 {
        h.order(&format!("order-{i}"), "alice", "widget", 1, dec!(0.01), dec!(500))
            .unwrap();
    }
    h.chain.pay("cc33", dec!(0.01));

    let attempts = (0..8).map(|i| {
        let service = h.service.clone();
        tokio::spawn(async move { service.confirm_payment(&format!("order-{i}"), "cc33").await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::DuplicateTransaction(_))));
    assert_eq!(h.service.ledger().stock("widget"), 99);

    let paid = (0..8)
        .filter(|i| {
            h.service.ledger().order(&format!("order-{i}")).unwrap().status == OrderStatus::Paid
        })
        .count();
    assert_eq!(paid, 1);
}

#[tokio::test]
async fn test_status_never_regresses() {
    let h = TestHarness::setup().await.unwrap();
    h.service.ledger().set_stock("widget", 10);
    h.order("order-1", "alice", "widget", 1, dec!(0.01), dec!(500))
        .unwrap();
    h.chain.pay("dd01", dec!(0.01));
    h.chain.pay("dd02", dec!(0.01));
    h.chain
        .fail("dd03", VerifyErrorKind::AmountMismatch, "paid 0.009");

    h.service.confirm_payment("order-1", "dd01").await.unwrap();
    for tx in ["dd01", "dd02", "dd03", "dd04"] {
        assert!(h.service.confirm_payment("order-1", tx).await.is_err());
        assert_eq!(
            h.service.ledger().order("order-1").unwrap().status,
            OrderStatus::Paid
        );
    }
    let confirmed = h
        .service
        .ledger()
        .payments_for_order("order-1")
        .into_iter()
        .filter(|p| p.status == PaymentStatus::Confirmed)
        .count();
    assert_eq!(confirmed, 1);
    assert_eq!(h.service.ledger().stock("widget"), 9);
}

#[tokio::test]
async fn test_mismatch_is_auditable_and_not_retryable() {
    let h = TestHarness::setup().await.unwrap();
    h.service.ledger().set_stock("widget", 1);
    h.order("order-1", "alice", "widget", 1, dec!(0.01), dec!(500))
        .unwrap();
    h.chain
        .fail("ee01", VerifyErrorKind::AddressMismatch, "wrong output");

    let err = h
        .service
        .confirm_payment("order-1", "ee01")
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(err.status_code(), 400);

    let attempt = h.service.ledger().payment_by_order("order-1").unwrap();
    assert_eq!(attempt.status, PaymentStatus::Failed);
    assert_eq!(attempt.failure_kind, Some(VerifyErrorKind::AddressMismatch));
}

#[tokio::test]
async fn test_reverify_settles_once_chain_catches_up() {
    let h = TestHarness::setup().await.unwrap();
    h.service.ledger().set_stock("widget", 5);
    h.order("order-1", "alice", "widget", 1, dec!(0.01), dec!(500))
        .unwrap();

    // Not yet indexed by the node the first time round.
    assert!(h.service.confirm_payment("order-1", "ff01").await.is_err());
    let failed = h.service.ledger().payment_by_order("order-1").unwrap();
    assert_eq!(failed.status, PaymentStatus::Failed);

    h.chain.pay("ff01", dec!(0.01));
    let payment = h
        .service
        .ledger()
        .reverify_payment(&failed.id)
        .await
        .unwrap();
    assert_eq!(payment.id, failed.id);
    assert_eq!(payment.status, PaymentStatus::Confirmed);
    assert_eq!(payment.verification_attempts, 2);
    assert_eq!(
        h.service.ledger().order("order-1").unwrap().status,
        OrderStatus::Paid
    );
    assert_eq!(h.service.ledger().stock("widget"), 4);
}

#[tokio::test]
async fn test_unsupported_currency_order_rejected() {
    let h = TestHarness::setup().await.unwrap();
    let err = h
        .service
        .register_order(cryptopay_settlement::NewOrder {
            id: None,
            user_id: "alice".into(),
            items: Vec::new(),
            currency: "DOGE".into(),
            payment_address: None,
        })
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedCurrency(_)));
}

#[tokio::test]
async fn test_unconfirmed_resubmission_resumes_same_payment() {
    let h = TestHarness::setup().await.unwrap();
    h.service.ledger().set_stock("widget", 5);
    h.order("order-1", "alice", "widget", 1, dec!(0.01), dec!(500))
        .unwrap();
    h.chain
        .fail("ab0c", VerifyErrorKind::Unconfirmed, "0 of 1 confirmations");

    let err = h
        .service
        .confirm_payment("order-1", "ab0c")
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let first = h.service.ledger().payment_by_order("order-1").unwrap();
    assert_eq!(first.status, PaymentStatus::Failed);
    assert_eq!(first.failure_kind, Some(VerifyErrorKind::Unconfirmed));

    h.chain.pay("ab0c", dec!(0.01));
    let payment = h.service.confirm_payment("order-1", "ab0c").await.unwrap();
    assert_eq!(payment.id, first.id);
    assert_eq!(payment.verification_attempts, 2);
    assert_eq!(h.service.ledger().payments_for_order("order-1").len(), 1);
    assert_eq!(h.service.ledger().stock("widget"), 4);
}

#[tokio::test]
async fn test_reverify_after_cancellation_is_invalid_transition() {
    let h = TestHarness::setup().await.unwrap();
    h.service.ledger().set_stock("widget", 5);
    h.order("order-1", "alice", "widget", 1, dec!(0.01), dec!(500))
        .unwrap();
    assert!(h.service.confirm_payment("order-1", "ab0d").await.is_err());
    let failed = h.service.ledger().payment_by_order("order-1").unwrap();
    h.service.ledger().cancel("order-1").unwrap();

    h.chain.pay("ab0d", dec!(0.01));
    let err = h
        .service
        .ledger()
        .reverify_payment(&failed.id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition(_)), "{err}");
    assert_eq!(
        h.service.ledger().order("order-1").unwrap().status,
        OrderStatus::Cancelled
    );
    assert_eq!(h.service.ledger().stock("widget"), 5);
}
