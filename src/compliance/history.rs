//! Per-user transaction history read by risk scoring and pattern detection.

use crate::model::TransactionRecord;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Append-only record of settled and rejected payments, grouped by user.
#[derive(Debug, Default)]
pub struct TransactionHistory {
    by_user: RwLock<HashMap<String, Vec<TransactionRecord>>>,
}

impl TransactionHistory {
    /// Create an empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record.
    pub fn record(&self, record: TransactionRecord) {
        self.by_user
            .write()
            .entry(record.user_id.clone())
            .or_default()
            .push(record);
    }

    /// All records of a user, oldest first.
    #[must_use]
    pub fn for_user(&self, user_id: &str) -> Vec<TransactionRecord> {
        self.by_user.read().get(user_id).cloned().unwrap_or_default()
    }

    /// Records of a user other than `exclude_id`.
    #[must_use]
    pub fn prior_to(&self, user_id: &str, exclude_id: &str) -> Vec<TransactionRecord> {
        self.by_user
            .read()
            .get(user_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.id != exclude_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_user.read().values().map(Vec::len).sum()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
