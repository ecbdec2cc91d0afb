//! Risk gate implementation

use coinledger_core::AccountId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::error::{RiskError, RiskResult};
use crate::event::{RiskEvent, AUTO_ACTOR};
use crate::ledger::RiskLedger;
use crate::state::RiskProfile;
use crate::store::{MemoryRiskStore, RiskStore};

/// Outcome of a pre-debit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RiskDecision {
    Allowed,
    Frozen { reason: Option<String> },
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }
}

/// A fraud signal reported by a detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSignal {
    /// Detector name, e.g. `click_rate`
    pub reason: String,
    pub points: u64,
}

impl RiskSignal {
    pub fn new(reason: impl Into<String>, points: u64) -> Self {
        Self {
            reason: reason.into(),
            points,
        }
    }
}

/// One row of the risk overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub account: AccountId,
    pub risk_score: u64,
    pub is_frozen: bool,
}

/// Read-only snapshot for administrative tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskOverview {
    pub frozen_count: usize,
    pub top_risk: Vec<RiskSummary>,
}

/// Risk Gate - consulted before every debit
///
/// Profiles live in a `RiskStore` shared by every worker; each decision is
/// applied to the store first, then appended to the JSONL audit log.
pub struct RiskGate {
    store: Arc<dyn RiskStore>,
    audit: Mutex<RiskLedger>,
    config: RiskConfig,
}

impl RiskGate {
    /// Gate with an in-memory store and log
    pub fn new(config: RiskConfig) -> Self {
        Self::with_store(Arc::new(MemoryRiskStore::new()), RiskLedger::in_memory(), config)
    }

    pub fn with_store(store: Arc<dyn RiskStore>, audit: RiskLedger, config: RiskConfig) -> Self {
        Self {
            store,
            audit: Mutex::new(audit),
            config,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    async fn audit(&self, event: &RiskEvent) {
        if let Err(e) = self.audit.lock().await.append(event) {
            warn!(account = %event.account(), error = %e, "risk audit append failed");
        }
    }

    /// Is `account` allowed to be debited?
    pub async fn check_allowed(&self, account: &AccountId) -> RiskResult<RiskDecision> {
        Ok(match self.store.profile(account).await? {
            Some(profile) if profile.is_frozen => RiskDecision::Frozen {
                reason: profile.freeze_reason,
            },
            _ => RiskDecision::Allowed,
        })
    }

    /// Freeze an account.
    ///
    /// Freezing an already-frozen account still records the new reason and
    /// bumps `last_event_at`.
    pub async fn freeze(
        &self,
        account: &AccountId,
        reason: Option<String>,
        performed_by: &str,
    ) -> RiskResult<RiskProfile> {
        let event = RiskEvent::frozen(account.clone(), reason.clone(), performed_by);
        let profile = self.store.apply(&event).await?;
        self.audit(&event).await;
        warn!(account = %account, reason = ?reason, performed_by, "account frozen");
        Ok(profile)
    }

    /// Unfreeze an account (no-op on an unfrozen account besides the log entry)
    pub async fn unfreeze(&self, account: &AccountId, performed_by: &str) -> RiskResult<RiskProfile> {
        let event = RiskEvent::unfrozen(account.clone(), performed_by);
        let profile = self.store.apply(&event).await?;
        self.audit(&event).await;
        info!(account = %account, performed_by, "account unfrozen");
        Ok(profile)
    }

    /// Accumulate a fraud signal.
    ///
    /// Never freezes on its own unless `auto_freeze_threshold` is configured,
    /// in which case crossing it records a separate freeze by `auto`.
    pub async fn raise_risk_score(
        &self,
        account: &AccountId,
        signal: RiskSignal,
    ) -> RiskResult<RiskProfile> {
        Ok(self.raise(account, signal).await?.0)
    }

    /// Like `raise_risk_score`, also telling whether this call froze the account
    pub async fn raise(
        &self,
        account: &AccountId,
        signal: RiskSignal,
    ) -> RiskResult<(RiskProfile, bool)> {
        if signal.points == 0 {
            return Err(RiskError::InvalidSignal(format!(
                "signal '{}' carries no points",
                signal.reason
            )));
        }

        let event = RiskEvent::score_raised(account.clone(), signal.reason.clone(), signal.points);
        let profile = self.store.apply(&event).await?;
        self.audit(&event).await;
        info!(
            account = %account,
            signal = %signal.reason,
            points = signal.points,
            score = profile.risk_score,
            "risk score raised"
        );

        if let Some(threshold) = self.config.auto_freeze_threshold {
            if profile.risk_score >= threshold && !profile.is_frozen {
                let reason = format!("risk score {} reached {}", profile.risk_score, threshold);
                let freeze = RiskEvent::frozen(account.clone(), Some(reason.clone()), AUTO_ACTOR);
                // Another worker may have frozen it in between
                if let Some(frozen) = self.store.apply_over_threshold(&freeze, threshold).await? {
                    self.audit(&freeze).await;
                    warn!(account = %account, reason = %reason, "account frozen automatically");
                    return Ok((frozen, true));
                }
                return Ok((self.store.profile(account).await?.unwrap_or(profile), false));
            }
        }

        Ok((profile, false))
    }

    /// Profile of one account, if it has ever had a risk event
    pub async fn profile(&self, account: &AccountId) -> RiskResult<Option<RiskProfile>> {
        self.store.profile(account).await
    }

    /// Frozen-account count and the `top_n` highest risk scores
    pub async fn overview(&self, top_n: usize) -> RiskResult<RiskOverview> {
        let top_risk = self
            .store
            .top_risk(top_n)
            .await?
            .into_iter()
            .map(|p| RiskSummary {
                account: p.account,
                risk_score: p.risk_score,
                is_frozen: p.is_frozen,
            })
            .collect();

        Ok(RiskOverview {
            frozen_count: self.store.frozen_count().await?,
            top_risk,
        })
    }

    /// Overview with the configured size
    pub async fn default_overview(&self) -> RiskResult<RiskOverview> {
        self.overview(self.config.overview_top_n).await
    }
}

impl Default for RiskGate {
    fn default() -> Self {
        Self::new(RiskConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_account_allowed() {
        let gate = RiskGate::default();
        assert_eq!(gate.check_allowed(&id("alice")).await.unwrap(), RiskDecision::Allowed);
    }

    #[tokio::test]
    async fn test_freeze_is_idempotent_and_updates_reason() {
        let gate = RiskGate::default();
        let alice = id("alice");

        let first = gate.freeze(&alice, Some("spam".into()), "admin").await.unwrap();
        let second = gate
            .freeze(&alice, Some("chargeback".into()), "admin")
            .await
            .unwrap();

        assert!(second.is_frozen);
        assert_eq!(second.freeze_reason.as_deref(), Some("chargeback"));
        assert!(second.last_event_at >= first.last_event_at);
        assert_eq!(
            gate.check_allowed(&alice).await.unwrap(),
            RiskDecision::Frozen {
                reason: Some("chargeback".into())
            }
        );

        gate.unfreeze(&alice, "admin").await.unwrap();
        assert!(gate.check_allowed(&alice).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_score_does_not_freeze_by_default() {
        let gate = RiskGate::default();
        let alice = id("alice");
        let profile = gate
            .raise_risk_score(&alice, RiskSignal::new("click_rate", 1_000))
            .await
            .unwrap();
        assert_eq!(profile.risk_score, 1_000);
        assert!(!profile.is_frozen);
    }

    #[tokio::test]
    async fn test_auto_freeze_threshold() {
        let gate = RiskGate::new(RiskConfig::default().with_auto_freeze(50));
        let alice = id("alice");

        let p = gate
            .raise_risk_score(&alice, RiskSignal::new("click_rate", 30))
            .await
            .unwrap();
        assert!(!p.is_frozen);

        let (p, froze) = gate
            .raise(&alice, RiskSignal::new("click_rate", 20))
            .await
            .unwrap();
        assert!(p.is_frozen);
        assert!(froze);

        // Further signals keep the existing freeze
        let (_, froze) = gate
            .raise(&alice, RiskSignal::new("click_rate", 5))
            .await
            .unwrap();
        assert!(!froze);
        assert!(p.freeze_reason.unwrap().contains("50"));
    }

    #[tokio::test]
    async fn test_zero_point_signal_rejected() {
        let gate = RiskGate::default();
        assert!(matches!(
            gate.raise_risk_score(&id("alice"), RiskSignal::new("noop", 0)).await,
            Err(RiskError::InvalidSignal(_))
        ));
        assert!(gate.profile(&id("alice")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overview_orders_by_score() {
        let gate = RiskGate::default();
        for (name, points) in [("carol", 5), ("alice", 40), ("bob", 40), ("dave", 1)] {
            gate.raise_risk_score(&id(name), RiskSignal::new("velocity", points))
                .await
                .unwrap();
        }
        gate.freeze(&id("dave"), None, "admin").await.unwrap();

        let overview = gate.overview(3).await.unwrap();
        assert_eq!(overview.frozen_count, 1);
        let names: Vec<_> = overview.top_risk.iter().map(|s| s.account.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }
}
