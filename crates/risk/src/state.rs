//! Risk profiles, folded from risk events

use chrono::{DateTime, Utc};
use coinledger_core::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::event::RiskEvent;

/// Risk profile of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub account: AccountId,
    /// Accumulated fraud-signal score, never decreases
    pub risk_score: u64,
    pub is_frozen: bool,
    pub freeze_reason: Option<String>,
    pub last_event_at: Option<DateTime<Utc>>,
}

impl RiskProfile {
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            risk_score: 0,
            is_frozen: false,
            freeze_reason: None,
            last_event_at: None,
        }
    }
}

/// Risk state: profiles created lazily on the first event for an account
#[derive(Debug, Default)]
pub struct RiskState {
    profiles: HashMap<AccountId, RiskProfile>,
}

impl RiskState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event
    pub fn apply(&mut self, event: &RiskEvent) {
        let profile = self
            .profiles
            .entry(event.account().clone())
            .or_insert_with(|| RiskProfile::new(event.account().clone()));

        match event {
            RiskEvent::Frozen { reason, .. } => {
                profile.is_frozen = true;
                profile.freeze_reason = reason.clone();
            }
            RiskEvent::Unfrozen { .. } => {
                profile.is_frozen = false;
                profile.freeze_reason = None;
            }
            RiskEvent::ScoreRaised { points, .. } => {
                profile.risk_score = profile.risk_score.saturating_add(*points);
            }
        }
        profile.last_event_at = Some(event.timestamp());
    }

    pub fn profile(&self, account: &AccountId) -> Option<&RiskProfile> {
        self.profiles.get(account)
    }

    pub fn is_frozen(&self, account: &AccountId) -> bool {
        self.profiles.get(account).is_some_and(|p| p.is_frozen)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &RiskProfile> {
        self.profiles.values()
    }

    pub fn frozen_count(&self) -> usize {
        self.profiles.values().filter(|p| p.is_frozen).count()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountId {
        AccountId::new("alice").unwrap()
    }

    #[test]
    fn test_unknown_account_not_frozen() {
        let state = RiskState::new();
        assert!(!state.is_frozen(&alice()));
        assert!(state.profile(&alice()).is_none());
    }

    #[test]
    fn test_freeze_then_unfreeze() {
        let mut state = RiskState::new();
        state.apply(&RiskEvent::frozen(alice(), Some("spam".into()), "admin"));
        assert!(state.is_frozen(&alice()));
        assert_eq!(state.frozen_count(), 1);

        state.apply(&RiskEvent::unfrozen(alice(), "admin"));
        let profile = state.profile(&alice()).unwrap();
        assert!(!profile.is_frozen);
        assert!(profile.freeze_reason.is_none());
        assert!(profile.last_event_at.is_some());
    }

    #[test]
    fn test_score_accumulates_without_freezing() {
        let mut state = RiskState::new();
        state.apply(&RiskEvent::score_raised(alice(), "click_rate", 30));
        state.apply(&RiskEvent::score_raised(alice(), "click_rate", 30));
        let profile = state.profile(&alice()).unwrap();
        assert_eq!(profile.risk_score, 60);
        assert!(!profile.is_frozen);
    }
}
