//! Expiry sweeper
//!
//! Finds grants past `ends_at` and finalizes each exactly once. Safe to run
//! redundantly: the store's claim decides the single finalizer, and the
//! winner payout goes through the processor under a deterministic
//! transaction id, so even a re-claimed grant pays at most once.

use chrono::{DateTime, Utc};
use coinledger_core::AccountId;
use coinledger_ledger::SettlementReceipt;
use coinledger_settlement::{
    SettleInstruction, SettleRequest, SettlementError, TransactionProcessor,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SweeperConfig;
use crate::error::{SweepError, SweepResult};
use crate::grant::{Grant, GrantKind, NewGrant};
use crate::store::GrantStore;

/// Result of finalizing one grant
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub grant_id: String,
    pub payout: Option<SettlementReceipt>,
}

/// Summary of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    /// Grants finalized by this sweep
    pub processed: usize,
    /// Payout transaction ids issued
    pub payouts: Vec<String>,
    /// Grants another sweeper got to first
    pub already_finalized: Vec<String>,
    /// Grants whose finalization failed and will be retried
    pub failures: Vec<(String, String)>,
}

pub struct ExpirySweeper {
    grants: Arc<dyn GrantStore>,
    processor: Arc<TransactionProcessor>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(
        grants: Arc<dyn GrantStore>,
        processor: Arc<TransactionProcessor>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            grants,
            processor,
            config,
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn GrantStore> {
        &self.grants
    }

    pub async fn create_grant(&self, grant: NewGrant) -> SweepResult<Grant> {
        let grant = self.grants.create(grant).await?;
        info!(grant = %grant.id, kind = %grant.kind, subject = %grant.subject, ends_at = %grant.ends_at, "grant created");
        Ok(grant)
    }

    pub async fn assign_winner(&self, id: &str, winner: &AccountId) -> SweepResult<Grant> {
        let grant = self.grants.assign_winner(id, winner).await?;
        info!(grant = %id, winner = %winner, "cycle winner assigned");
        Ok(grant)
    }

    /// Grants of `kind` currently held by `subject`
    pub async fn active_grants(
        &self,
        subject: &AccountId,
        kind: GrantKind,
        now: DateTime<Utc>,
    ) -> SweepResult<Vec<Grant>> {
        Ok(self.grants.active_for(subject, kind, now).await?)
    }

    /// Finalize every grant due at `now`
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepResult<SweepReport> {
        let due = self.grants.due(now, self.config.claim_lease()).await?;
        let mut report = SweepReport::default();

        for grant in due {
            match self.finalize(&grant, now).await {
                Ok(outcome) => {
                    report.processed += 1;
                    if let Some(receipt) = outcome.payout {
                        report.payouts.push(receipt.transaction_id().to_string());
                    }
                }
                Err(SweepError::GrantAlreadyFinalized(id)) => {
                    debug!(grant = %id, "grant finalized elsewhere");
                    report.already_finalized.push(id);
                }
                Err(e) => {
                    warn!(grant = %grant.id, error = %e, "grant finalization failed");
                    report.failures.push((grant.id.clone(), e.to_string()));
                }
            }
        }

        if report.processed > 0 || !report.failures.is_empty() {
            info!(
                processed = report.processed,
                payouts = report.payouts.len(),
                skipped = report.already_finalized.len(),
                failed = report.failures.len(),
                "sweep complete"
            );
        }
        Ok(report)
    }

    /// Claim and finalize one grant.
    ///
    /// Returns `GrantAlreadyFinalized` when another caller holds or has
    /// completed the claim. A failed payout releases the claim so a later
    /// sweep retries it.
    pub async fn finalize(&self, grant: &Grant, now: DateTime<Utc>) -> SweepResult<FinalizeOutcome> {
        if !self
            .grants
            .claim(&grant.id, now, self.config.claim_lease())
            .await?
        {
            return Err(SweepError::GrantAlreadyFinalized(grant.id.clone()));
        }
        info!(grant = %grant.id, kind = %grant.kind, subject = %grant.subject, "grant claimed");

        // Winner may have been assigned after `grant` was read
        let current = self.grants.get(&grant.id).await?.unwrap_or_else(|| grant.clone());

        let payout = if current.has_payout() {
            match self.pay_winner(&current).await {
                Ok(receipt) => Some(receipt),
                Err(source) => {
                    if let Err(e) = self.grants.release_claim(&current.id).await {
                        warn!(grant = %current.id, error = %e, "failed to release claim");
                    }
                    return Err(SweepError::Payout {
                        grant: current.id.clone(),
                        source,
                    });
                }
            }
        } else {
            None
        };

        if !self.grants.mark_finalized(&current.id, now).await? {
            // Claim expired and was taken over mid-flight
            return Err(SweepError::GrantAlreadyFinalized(current.id.clone()));
        }
        info!(grant = %current.id, paid = payout.is_some(), "grant finalized");

        Ok(FinalizeOutcome {
            grant_id: current.id,
            payout,
        })
    }

    async fn pay_winner(
        &self,
        grant: &Grant,
    ) -> Result<SettlementReceipt, SettlementError> {
        let Some(winner) = grant.winner.clone() else {
            return Err(SettlementError::InvalidAmount(
                "cycle has no winner".to_string(),
            ));
        };
        let request = SettleRequest::new(
            grant.payout_transaction_id(),
            SettleInstruction::Reward {
                recipient: winner,
                amount: i64::try_from(grant.prize.value()).unwrap_or(i64::MAX),
                class: Some(self.config.payout_class),
                stake: None,
                forfeit: None,
            },
        )
        .with_metadata("grant_id", grant.id.as_str())
        .with_metadata("grant_kind", grant.kind.as_str());

        self.processor.settle(&request).await
    }

    /// Sweep on a fixed interval until `shutdown` flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = self.config.interval_secs, "expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep(Utc::now()).await {
                        warn!(error = %e, "sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("expiry sweeper stopped");
    }
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.processed == 0 && self.already_finalized.is_empty() && self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::GrantStatus;
    use crate::memory::MemoryGrantStore;
    use chrono::Duration;
    use coinledger_core::{CoinClass, Coins};
    use coinledger_ledger::MemoryIdempotencyLedger;
    use coinledger_risk::RiskGate;
    use coinledger_settlement::SettlementConfig;
    use coinledger_store::MemoryBalanceStore;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    fn sweeper() -> ExpirySweeper {
        let processor = TransactionProcessor::new(
            Arc::new(MemoryBalanceStore::new()),
            Arc::new(MemoryIdempotencyLedger::new()),
            Arc::new(RiskGate::default()),
            SettlementConfig::default(),
        );
        ExpirySweeper::new(
            Arc::new(MemoryGrantStore::new()),
            Arc::new(processor),
            SweeperConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_expired_assignment_is_finalized() {
        let sweeper = sweeper();
        let now = Utc::now();
        let grant = sweeper
            .create_grant(NewGrant::new(
                GrantKind::OfficerAssignment,
                id("officer"),
                now - Duration::hours(2),
                now - Duration::hours(1),
            ))
            .await
            .unwrap();

        let report = sweeper.sweep(now).await.unwrap();
        assert_eq!(report.processed, 1);
        assert!(report.payouts.is_empty());

        let stored = sweeper.store().get(&grant.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GrantStatus::Finalized);
        assert_eq!(stored.finalized_at, Some(now));

        // Nothing left on the next pass
        assert!(sweeper.sweep(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_winner_is_paid() {
        let sweeper = sweeper();
        let now = Utc::now();
        let grant = sweeper
            .create_grant(
                NewGrant::new(
                    GrantKind::FeatureCycle,
                    id("streamer"),
                    now - Duration::days(7),
                    now - Duration::minutes(1),
                )
                .with_prize(Coins::from(5000)),
            )
            .await
            .unwrap();
        sweeper.assign_winner(&grant.id, &id("streamer")).await.unwrap();

        let outcome = sweeper.finalize(&grant, now).await.unwrap();
        let receipt = outcome.payout.unwrap();
        assert_eq!(receipt.transaction_id().as_str(), grant.payout_transaction_id());
        assert_eq!(
            receipt.balances_of(&id("streamer")).unwrap().get(CoinClass::Earned),
            Coins::from(5000)
        );

        let err = sweeper.finalize(&grant, now).await.unwrap_err();
        assert!(matches!(err, SweepError::GrantAlreadyFinalized(_)));
    }

    #[tokio::test]
    async fn test_unexpired_grant_is_not_claimed() {
        let sweeper = sweeper();
        let now = Utc::now();
        let grant = sweeper
            .create_grant(NewGrant::new(
                GrantKind::Multiplier,
                id("viewer"),
                now,
                now + Duration::minutes(30),
            ))
            .await
            .unwrap();

        assert!(sweeper.sweep(now).await.unwrap().is_empty());
        assert_eq!(
            sweeper
                .active_grants(&id("viewer"), GrantKind::Multiplier, now)
                .await
                .unwrap()
                .len(),
            1
        );
        let err = sweeper.finalize(&grant, now).await.unwrap_err();
        assert!(matches!(err, SweepError::GrantAlreadyFinalized(_)));
    }
}
