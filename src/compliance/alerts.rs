//! Case management for compliance alerts.

use super::gate::ComplianceDecision;
use crate::error::{Error, Result};
use crate::model::{Alert, AlertStatus, Resolution};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Optional criteria for [`AlertStore::list`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    /// Case status.
    pub status: Option<AlertStatus>,
    /// Subject user.
    pub user_id: Option<String>,
    /// Related order.
    pub order_id: Option<String>,
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        self.status.map_or(true, |s| alert.status == s)
            && self.user_id.as_ref().map_or(true, |u| &alert.user_id == u)
            && self
                .order_id
                .as_ref()
                .map_or(true, |o| alert.order_id.as_ref() == Some(o))
    }
}

#[derive(Default)]
struct Cases {
    alerts: HashMap<String, Alert>,
    decisions: HashMap<String, ComplianceDecision>,
}

/// Alerts and the compliance decision of each evaluated order.
#[derive(Default)]
pub struct AlertStore {
    cases: RwLock<Cases>,
}

impl AlertStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new alert.
    pub fn insert(&self, alert: Alert) -> Alert {
        self.cases
            .write()
            .alerts
            .insert(alert.id.clone(), alert.clone());
        alert
    }

    /// Remember the decision for an order, replacing any earlier one.
    pub fn record_decision(&self, order_id: &str, decision: ComplianceDecision) {
        self.cases
            .write()
            .decisions
            .insert(order_id.to_string(), decision);
    }

    /// Latest decision for an order.
    #[must_use]
    pub fn decision(&self, order_id: &str) -> Option<ComplianceDecision> {
        self.cases.read().decisions.get(order_id).cloned()
    }

    /// Look up an alert.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlertNotFound`] if absent.
    pub fn get(&self, alert_id: &str) -> Result<Alert> {
        self.cases
            .read()
            .alerts
            .get(alert_id)
            .cloned()
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))
    }

    /// Alerts matching `filter`, oldest first.
    #[must_use]
    pub fn list(&self, filter: &AlertFilter) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self
            .cases
            .read()
            .alerts
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        alerts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        alerts
    }

    /// Whether every alert raised for `order_id` is closed.
    #[must_use]
    pub fn all_closed_for_order(&self, order_id: &str) -> bool {
        self.cases
            .read()
            .alerts
            .values()
            .filter(|a| a.order_id.as_deref() == Some(order_id))
            .all(|a| a.status.is_closed())
    }

    fn update(&self, alert_id: &str, next: AlertStatus, resolution: Option<Resolution>) -> Result<Alert> {
        let mut cases = self.cases.write();
        let alert = cases
            .alerts
            .get_mut(alert_id)
            .ok_or_else(|| Error::AlertNotFound(alert_id.to_string()))?;
        if alert.status.is_closed() {
            return Err(Error::InvalidTransition(format!(
                "alert {alert_id} is already {:?}",
                alert.status
            )));
        }
        if alert.status == next {
            return Err(Error::InvalidTransition(format!(
                "alert {alert_id} is already {next:?}"
            )));
        }
        info!("Alert {alert_id} ({}): {:?} -> {next:?}", alert.alert_type.as_str(), alert.status);
        alert.status = next;
        if resolution.is_some() {
            alert.resolution = resolution;
        }
        alert.updated_at = Utc::now();
        Ok(alert.clone())
    }

    /// An analyst picked the alert up.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is missing, closed or already under review.
    pub fn mark_under_review(&self, alert_id: &str) -> Result<Alert> {
        self.update(alert_id, AlertStatus::UnderReview, None)
    }

    /// Close the alert as a false positive or handled case.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is missing or already closed.
    pub fn resolve(&self, alert_id: &str, resolved_by: &str, note: &str) -> Result<Alert> {
        self.update(
            alert_id,
            AlertStatus::Resolved,
            Some(Resolution {
                resolved_by: resolved_by.to_string(),
                note: note.to_string(),
                resolved_at: Utc::now(),
            }),
        )
    }

    /// Escalate the alert to a senior analyst.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is missing, closed or already escalated.
    pub fn escalate(&self, alert_id: &str) -> Result<Alert> {
        self.update(alert_id, AlertStatus::Escalated, None)
    }

    /// Close the alert by filing a regulatory report.
    ///
    /// # Errors
    ///
    /// Returns an error if the alert is missing or already closed.
    pub fn file(&self, alert_id: &str, filed_by: &str, note: &str) -> Result<Alert> {
        self.update(
            alert_id,
            AlertStatus::Filed,
            Some(Resolution {
                resolved_by: filed_by.to_string(),
                note: note.to_string(),
                resolved_at: Utc::now(),
            }),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::{AlertType, Severity};
    use serde_json::json;

    fn alert(order: &str) -> Alert {
        Alert::new(AlertType::CtrRequired, Severity::Medium, "u1", json!({})).for_settlement(order, "p")
    }

    #[test]
    fn test_lifecycle_and_terminal_states() {
        let store = AlertStore::new();
        let a = store.insert(alert("o1"));

        store.mark_under_review(&a.id).unwrap();
        assert!(store.mark_under_review(&a.id).is_err());
        store.escalate(&a.id).unwrap();
        let resolved = store.resolve(&a.id, "analyst", "false positive").unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolution.unwrap().resolved_by, "analyst");

        assert!(matches!(store.escalate(&a.id), Err(Error::InvalidTransition(_))));
        assert!(store.file(&a.id, "analyst", "late").is_err());
        assert!(matches!(store.resolve("missing", "x", "y"), Err(Error::AlertNotFound(_))));
    }

    #[test]
    fn test_list_filters_and_closure_check() {
        let store = AlertStore::new();
        let a = store.insert(alert("o1"));
        let b = store.insert(alert("o1"));
        store.insert(alert("o2"));

        let by_order = store.list(&AlertFilter {
            order_id: Some("o1".into()),
            ..AlertFilter::default()
        });
        assert_eq!(by_order.len(), 2);

        store.file(&a.id, "analyst", "SAR filed").unwrap();
        assert!(!store.all_closed_for_order("o1"));
        store.resolve(&b.id, "analyst", "ok").unwrap();
        assert!(store.all_closed_for_order("o1"));

        let open = store.list(&AlertFilter {
            status: Some(AlertStatus::Open),
            ..AlertFilter::default()
        });
        assert_eq!(open.len(), 1);
    }
}
