//! Sanctions screening against configured country and name lists.

use crate::config::ComplianceConfig;
use crate::model::UserProfile;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Match strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningOutcome {
    /// No list matched.
    Clear,
    /// Partial name match.
    PotentialMatch,
    /// Sanctioned jurisdiction.
    ConfirmedMatch,
}

/// What the caller should do with the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningAction {
    /// Proceed.
    Allow,
    /// Hold for an analyst.
    ManualReview,
    /// Refuse.
    Block,
}

/// Result of screening one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreeningResult {
    /// Match strength.
    pub result: ScreeningOutcome,
    /// 0 when clear, 85 for a name match, 100 for a country match.
    pub score: u8,
    /// Recommended action.
    pub action: ScreeningAction,
    /// List entries that matched.
    pub matches: Vec<String>,
}

impl ScreeningResult {
    fn clear() -> Self {
        Self {
            result: ScreeningOutcome::Clear,
            score: 0,
            action: ScreeningAction::Allow,
            matches: Vec::new(),
        }
    }
}

/// Screens users against sanctioned countries (exact) and names (substring).
#[derive(Debug, Clone)]
pub struct SanctionsScreener {
    countries: HashSet<String>,
    names: Vec<String>,
}

impl SanctionsScreener {
    /// Build a screener from the compliance configuration.
    #[must_use]
    pub fn new(config: &ComplianceConfig) -> Self {
        Self {
            countries: config
                .sanctioned_countries
                .iter()
                .map(|c| c.trim().to_ascii_uppercase())
                .collect(),
            names: config
                .sanctioned_names
                .iter()
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Screen a user profile. A country match takes precedence over name matches.
    #[must_use]
    pub fn screen(&self, user: &UserProfile) -> ScreeningResult {
        let country = user.country.trim().to_ascii_uppercase();
        if self.countries.contains(&country) {
            return ScreeningResult {
                result: ScreeningOutcome::ConfirmedMatch,
                score: 100,
                action: ScreeningAction::Block,
                matches: vec![country],
            };
        }

        let name = user.name.trim().to_lowercase();
        if name.is_empty() {
            return ScreeningResult::clear();
        }
        let matches: Vec<String> = self
            .names
            .iter()
            .filter(|listed| name.contains(listed.as_str()) || listed.contains(name.as_str()))
            .cloned()
            .collect();
        if matches.is_empty() {
            return ScreeningResult::clear();
        }
        ScreeningResult {
            result: ScreeningOutcome::PotentialMatch,
            score: 85,
            action: ScreeningAction::ManualReview,
            matches,
        }
    }
}
