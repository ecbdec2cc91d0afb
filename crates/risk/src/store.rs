//! Risk profile storage

use async_trait::async_trait;
use coinledger_core::AccountId;
use tokio::sync::RwLock;

use crate::error::{RiskError, RiskResult};
use crate::event::RiskEvent;
use crate::state::{RiskProfile, RiskState};

/// Current risk profile per account
///
/// Every worker consults the same store, so a freeze written by one is seen
/// by the next check on any other. Each `apply` is a single atomic update.
#[async_trait]
pub trait RiskStore: Send + Sync {
    async fn profile(&self, account: &AccountId) -> RiskResult<Option<RiskProfile>>;

    /// Apply one event and return the resulting profile
    async fn apply(&self, event: &RiskEvent) -> RiskResult<RiskProfile>;

    /// Apply a freeze only to an unfrozen account scoring at least `threshold`
    async fn apply_over_threshold(
        &self,
        event: &RiskEvent,
        threshold: u64,
    ) -> RiskResult<Option<RiskProfile>>;

    async fn frozen_count(&self) -> RiskResult<usize>;

    /// Up to `n` profiles with a positive score, highest first
    async fn top_risk(&self, n: usize) -> RiskResult<Vec<RiskProfile>>;
}

/// In-memory risk store (tests, single-process deployments)
#[derive(Default)]
pub struct MemoryRiskStore {
    state: RwLock<RiskState>,
}

impl MemoryRiskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskStore for MemoryRiskStore {
    async fn profile(&self, account: &AccountId) -> RiskResult<Option<RiskProfile>> {
        Ok(self.state.read().await.profile(account).cloned())
    }

    async fn apply(&self, event: &RiskEvent) -> RiskResult<RiskProfile> {
        let mut state = self.state.write().await;
        state.apply(event);
        state
            .profile(event.account())
            .cloned()
            .ok_or_else(|| RiskError::Corrupt {
                line: 0,
                reason: format!("profile missing for {}", event.account()),
            })
    }

    async fn apply_over_threshold(
        &self,
        event: &RiskEvent,
        threshold: u64,
    ) -> RiskResult<Option<RiskProfile>> {
        let mut state = self.state.write().await;
        let eligible = state
            .profile(event.account())
            .is_some_and(|p| !p.is_frozen && p.risk_score >= threshold);
        if !eligible {
            return Ok(None);
        }
        state.apply(event);
        Ok(state.profile(event.account()).cloned())
    }

    async fn frozen_count(&self) -> RiskResult<usize> {
        Ok(self.state.read().await.frozen_count())
    }

    async fn top_risk(&self, n: usize) -> RiskResult<Vec<RiskProfile>> {
        let state = self.state.read().await;
        let mut top: Vec<RiskProfile> = state
            .profiles()
            .filter(|p| p.risk_score > 0)
            .cloned()
            .collect();
        top.sort_by(|a, b| {
            b.risk_score
                .cmp(&a.risk_score)
                .then_with(|| a.account.cmp(&b.account))
        });
        top.truncate(n);
        Ok(top)
    }
}
