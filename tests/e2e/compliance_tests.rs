//! Compliance scenarios: screening, structuring, thresholds and case handling.

use super::{wait_for_evaluation, TestHarness};
use cryptopay_settlement::compliance::{ScreeningAction, ScreeningOutcome};
use cryptopay_settlement::model::{AlertStatus, AlertType};
use cryptopay_settlement::{Error, HoldReason, OrderStatus};
use rust_decimal_macros::dec;

#[tokio::test]
async fn test_ordinary_purchase_clears_compliance() {
    let h = TestHarness::setup().await.unwrap();
    let mut events = h.service.subscribe_events();
    h.user("alice", "Alice Example", "US");
    h.service.ledger().set_stock("widget", 10);
    h.order("order-1", "alice", "widget", 2, dec!(0.005), dec!(250))
        .unwrap();
    h.chain.pay("ab01", dec!(0.01));

    h.service.confirm_payment("order-1", "ab01").await.unwrap();
    let (allowed, requires_review) = wait_for_evaluation(&mut events, "order-1").await;

    assert!(allowed);
    assert!(!requires_review);
    let status = h.service.compliance_status("order-1").unwrap();
    assert!(status.hold.is_none());
    assert!(status.alerts.is_empty());
    assert_eq!(status.decision.unwrap().screening.result, ScreeningOutcome::Clear);

    h.service.ledger().mark_processing("order-1").unwrap();
    h.service.ledger().mark_shipped("order-1").unwrap();
}

#[tokio::test]
async fn test_sanctioned_country_blocks_fulfillment() {
    let h = TestHarness::setup().await.unwrap();
    let mut events = h.service.subscribe_events();
    h.user("reza", "Reza Example", "IR");
    h.service.ledger().set_stock("widget", 10);
    h.order("order-ir", "reza", "widget", 1, dec!(0.01), dec!(500))
        .unwrap();
    h.chain.pay("ab02", dec!(0.01));

    // Settlement itself is never undone by compliance.
    h.service.confirm_payment("order-ir", "ab02").await.unwrap();
    let (allowed, _) = wait_for_evaluation(&mut events, "order-ir").await;
    assert!(!allowed);

    let status = h.service.compliance_status("order-ir").unwrap();
    assert_eq!(status.hold.unwrap().reason, HoldReason::Blocked);
    let decision = status.decision.unwrap();
    assert_eq!(decision.screening.result, ScreeningOutcome::ConfirmedMatch);
    assert_eq!(decision.screening.action, ScreeningAction::Block);
    assert!(status
        .alerts
        .iter()
        .any(|a| a.alert_type == AlertType::SanctionsHit));
    assert_eq!(
        h.service.ledger().order("order-ir").unwrap().status,
        OrderStatus::Paid
    );

    h.service.ledger().mark_processing("order-ir").unwrap();
    let err = h.service.ledger().mark_shipped("order-ir").unwrap_err();
    assert!(matches!(err, Error::ComplianceBlocked(_)));

    // Closing the alert does not lift a block.
    for alert in status.alerts {
        h.service.resolve_alert(&alert.id, "analyst", "checked").unwrap();
    }
    assert!(h.service.ledger().hold("order-ir").is_some());
}

#[tokio::test]
async fn test_structuring_just_under_threshold_is_blocked() {
    let h = TestHarness::setup().await.unwrap();
    let mut events = h.service.subscribe_events();
    h.user("sam", "Sam Example", "US");
    h.service.ledger().set_stock("widget", 10);

    for (i, tx) in ["cd01", "cd02", "cd03"].into_iter().enumerate() {
        let order_id = format!("split-{i}");
        h.order(&order_id, "sam", "widget", 1, dec!(0.2), dec!(9500))
            .unwrap();
        h.chain.pay(tx, dec!(0.2));
        h.service.confirm_payment(&order_id, tx).await.unwrap();
        let (allowed, requires_review) = wait_for_evaluation(&mut events, &order_id).await;
        // Every one of them is above the large-transaction bound.
        assert!(requires_review);
        assert_eq!(allowed, i < 2, "split-{i}");
    }

    let status = h.service.compliance_status("split-2").unwrap();
    let structuring = status
        .alerts
        .iter()
        .find(|a| a.alert_type == AlertType::Structuring)
        .expect("structuring alert");
    assert_eq!(structuring.details["count"], 3);
    assert_eq!(status.hold.unwrap().reason, HoldReason::Blocked);
    assert!(!status.decision.unwrap().allowed);
}

#[tokio::test]
async fn test_reporting_threshold_review_then_release() {
    let h = TestHarness::setup().await.unwrap();
    let mut events = h.service.subscribe_events();
    h.user("bob", "Bob Example", "US");
    h.service.ledger().set_stock("server", 1);
    h.order("order-big", "bob", "server", 1, dec!(0.25), dec!(12000))
        .unwrap();
    h.chain.pay("ef01", dec!(0.25));

    h.service.confirm_payment("order-big", "ef01").await.unwrap();
    let (allowed, requires_review) = wait_for_evaluation(&mut events, "order-big").await;
    assert!(allowed);
    assert!(requires_review);

    let status = h.service.compliance_status("order-big").unwrap();
    assert_eq!(status.hold.unwrap().reason, HoldReason::ManualReview);
    let types: Vec<AlertType> = status.alerts.iter().map(|a| a.alert_type).collect();
    assert!(types.contains(&AlertType::CtrRequired));
    assert!(types.contains(&AlertType::LargeTransaction));

    h.service.ledger().mark_processing("order-big").unwrap();
    assert!(h.service.ledger().mark_shipped("order-big").is_err());

    let (first, rest) = status.alerts.split_first().unwrap();
    h.service.alerts().mark_under_review(&first.id).unwrap();
    let filed = h.service.file_alert(&first.id, "analyst", "CTR filed").unwrap();
    assert_eq!(filed.status, AlertStatus::Filed);
    // Still held while another alert is open.
    if !rest.is_empty() {
        assert!(h.service.ledger().hold("order-big").is_some());
    }
    for alert in rest {
        h.service
            .resolve_alert(&alert.id, "analyst", "known customer")
            .unwrap();
    }

    assert!(h.service.ledger().hold("order-big").is_none());
    h.service.ledger().mark_shipped("order-big").unwrap();
    h.service.ledger().mark_delivered("order-big").unwrap();
}

#[tokio::test]
async fn test_closed_alert_cannot_be_reopened() {
    let h = TestHarness::setup().await.unwrap();
    let mut events = h.service.subscribe_events();
    h.user("dana", "Dana Example", "US");
    h.service.ledger().set_stock("widget", 1);
    h.order("order-1", "dana", "widget", 1, dec!(0.2), dec!(6000))
        .unwrap();
    h.chain.pay("ef02", dec!(0.2));
    h.service.confirm_payment("order-1", "ef02").await.unwrap();
    wait_for_evaluation(&mut events, "order-1").await;

    let alert = h
        .service
        .alerts()
        .list(&cryptopay_settlement::compliance::AlertFilter {
            user_id: Some("dana".into()),
            ..Default::default()
        })
        .into_iter()
        .next()
        .expect("large transaction alert");
    h.service.resolve_alert(&alert.id, "analyst", "fine").unwrap();

    assert!(h.service.alerts().escalate(&alert.id).is_err());
    assert!(h.service.resolve_alert(&alert.id, "analyst", "again").is_err());
}
