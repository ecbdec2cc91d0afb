//! Transaction processor - the settlement state machine

use chrono::Utc;
use coinledger_bus::{EventBus, SettlementEvent};
use coinledger_core::{AccountId, Balances, CoinClass, Coins};
use coinledger_events::EventStore;
use coinledger_ledger::{
    fingerprint, IdempotencyLedger, Reservation, SettlementReceipt, TransactionId,
    TransactionRecord, TransactionStatus,
};
use coinledger_risk::{RiskDecision, RiskGate};
use coinledger_store::{BalanceStore, StoreError};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SettlementConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::plan::{plan, Plan};
use crate::request::SettleRequest;

/// How `settle_outcome` produced its receipt
#[derive(Debug, Clone, PartialEq)]
pub enum SettleOutcome {
    /// Applied by this call
    Committed(SettlementReceipt),
    /// Stored receipt of an earlier commit; nothing was applied
    Replayed(SettlementReceipt),
}

impl SettleOutcome {
    pub fn receipt(&self) -> &SettlementReceipt {
        match self {
            SettleOutcome::Committed(receipt) | SettleOutcome::Replayed(receipt) => receipt,
        }
    }

    pub fn into_receipt(self) -> SettlementReceipt {
        match self {
            SettleOutcome::Committed(receipt) | SettleOutcome::Replayed(receipt) => receipt,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, SettleOutcome::Replayed(_))
    }
}

/// Transaction Processor
///
/// Holds no locks of its own. Same-account ordering is enforced by the
/// balance store; duplicate delivery is absorbed by the idempotency ledger.
pub struct TransactionProcessor {
    store: Arc<dyn BalanceStore>,
    ledger: Arc<dyn IdempotencyLedger>,
    risk: Arc<RiskGate>,
    config: SettlementConfig,
    journal: Option<Mutex<EventStore>>,
    bus: Option<Arc<EventBus>>,
}

impl TransactionProcessor {
    pub fn new(
        store: Arc<dyn BalanceStore>,
        ledger: Arc<dyn IdempotencyLedger>,
        risk: Arc<RiskGate>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            risk,
            config,
            journal: None,
            bus: None,
        }
    }

    /// Append committed and rejected records to a JSONL journal
    pub fn with_journal(mut self, journal: EventStore) -> Self {
        self.journal = Some(Mutex::new(journal));
        self
    }

    /// Publish settlement results on the bus
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    pub fn risk(&self) -> &Arc<RiskGate> {
        &self.risk
    }

    /// Settle one request exactly once.
    ///
    /// Replays of a committed id return the stored receipt unchanged. Any
    /// rejection after the reservation releases it, so a corrected retry
    /// with the same id can still commit.
    pub async fn settle(&self, request: &SettleRequest) -> SettlementResult<SettlementReceipt> {
        self.settle_outcome(request).await.map(SettleOutcome::into_receipt)
    }

    /// `settle`, telling a fresh commit apart from a replay
    pub async fn settle_outcome(&self, request: &SettleRequest) -> SettlementResult<SettleOutcome> {
        let id = TransactionId::parse(&request.transaction_id)?;
        let kind = request.instruction.kind();
        let fp = fingerprint(request)?;

        match self.ledger.begin_or_get(&id, &fp).await? {
            Reservation::Replay(receipt) => {
                debug!(transaction_id = %id, kind = %kind, "replaying committed transaction");
                return Ok(SettleOutcome::Replayed(receipt));
            }
            Reservation::New => {
                debug!(transaction_id = %id, kind = %kind, "transaction reserved");
            }
        }

        match self.execute(&id, request).await {
            Ok(receipt) => {
                if let Err(e) = self.ledger.commit(&id, &receipt).await {
                    // Balances already moved: keep the reservation so the id
                    // cannot apply twice
                    error!(transaction_id = %id, error = %e, "commit failed after balance mutation");
                    return Err(e.into());
                }
                info!(
                    transaction_id = %id,
                    kind = %kind,
                    amount = %receipt.record.amount,
                    fee = %receipt.record.fee_amount,
                    "transaction committed"
                );
                self.journal(&receipt.record).await;
                self.publish(SettlementEvent::committed(&receipt));
                Ok(SettleOutcome::Committed(receipt))
            }
            Err(err) => {
                if let Err(e) = self.ledger.release(&id).await {
                    warn!(transaction_id = %id, error = %e, "failed to release reservation");
                }
                info!(
                    transaction_id = %id,
                    kind = %kind,
                    reason = err.code(),
                    "transaction rejected"
                );
                let record = rejected_record(id, request, &err);
                self.journal(&record).await;
                self.publish(SettlementEvent::rejected(record));
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        id: &TransactionId,
        request: &SettleRequest,
    ) -> SettlementResult<SettlementReceipt> {
        for account in request.instruction.debited_accounts() {
            if let RiskDecision::Frozen { reason } = self.risk.check_allowed(account).await? {
                warn!(transaction_id = %id, account = %account, "debit blocked by freeze");
                return Err(SettlementError::AccountFrozen {
                    account: account.clone(),
                    reason,
                });
            }
        }

        let attempts = self.config.max_settle_attempts.max(1);
        let mut attempt = 1;
        loop {
            let snapshot = self.snapshot(request).await?;
            let plan = plan(&request.instruction, &self.config, &snapshot)?;

            match self.store.apply_batch(&plan.deltas).await {
                Ok(balances) => return Ok(receipt(id, request, plan, balances)),
                // The snapshot went stale between read and conditional update
                Err(StoreError::InsufficientFunds { .. } | StoreError::Stale { .. })
                    if attempt < attempts =>
                {
                    debug!(transaction_id = %id, attempt, "balance changed concurrently, replanning");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn snapshot(
        &self,
        request: &SettleRequest,
    ) -> SettlementResult<BTreeMap<AccountId, Balances>> {
        let mut snapshot = BTreeMap::new();
        for account in request.instruction.accounts() {
            let balances = self.store.get_balances(account).await?;
            snapshot.insert(account.clone(), balances);
        }
        Ok(snapshot)
    }

    async fn journal(&self, record: &TransactionRecord) {
        if let Some(ref journal) = self.journal {
            if let Err(e) = journal.lock().await.append(record) {
                warn!(transaction_id = %record.transaction_id, error = %e, "journal append failed");
            }
        }
    }

    fn publish(&self, event: SettlementEvent) {
        if let Some(ref bus) = self.bus {
            bus.publish(event);
        }
    }

    /// Stored receipt for a committed id
    pub async fn lookup(&self, transaction_id: &str) -> SettlementResult<Option<SettlementReceipt>> {
        let id = TransactionId::parse(transaction_id)?;
        Ok(self.ledger.lookup(&id).await?)
    }

    pub async fn balances(&self, account: &AccountId) -> SettlementResult<Balances> {
        Ok(self.store.get_balances(account).await?)
    }

    /// Create the account with the signup bonus; re-opening returns the
    /// existing balances untouched
    pub async fn open_account(&self, account: &AccountId) -> SettlementResult<(Balances, bool)> {
        let initial = Balances::default().with(CoinClass::Free, Coins::from(self.config.signup_bonus));
        let (balances, created) = self.store.open_account(account, initial).await?;
        if created {
            info!(account = %account, bonus = self.config.signup_bonus, "account opened");
        }
        Ok((balances, created))
    }
}

fn receipt(
    id: &TransactionId,
    request: &SettleRequest,
    plan: Plan,
    balances: BTreeMap<AccountId, Balances>,
) -> SettlementReceipt {
    let mut metadata = request.metadata.clone();
    metadata.extend(plan.metadata);

    SettlementReceipt {
        record: TransactionRecord {
            transaction_id: id.clone(),
            kind: plan.kind,
            status: TransactionStatus::Committed,
            source: plan.source,
            destination: plan.destination,
            amount: plan.amount,
            fee_amount: plan.fee_amount,
            reason: None,
            metadata,
            created_at: Utc::now(),
        },
        balances,
    }
}

fn rejected_record(
    id: TransactionId,
    request: &SettleRequest,
    err: &SettlementError,
) -> TransactionRecord {
    let accounts = request.instruction.accounts();
    let debited = request.instruction.debited_accounts();
    TransactionRecord {
        transaction_id: id,
        kind: request.instruction.kind(),
        status: TransactionStatus::Rejected,
        source: debited.first().map(|a| (*a).clone()),
        destination: accounts
            .iter()
            .find(|a| !debited.contains(a))
            .map(|a| (*a).clone()),
        amount: Coins::ZERO,
        fee_amount: Coins::ZERO,
        reason: Some(err.code().to_string()),
        metadata: request.metadata.clone(),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinledger_ledger::MemoryIdempotencyLedger;
    use crate::request::SettleInstruction;
    use coinledger_store::MemoryBalanceStore;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    fn processor() -> TransactionProcessor {
        TransactionProcessor::new(
            Arc::new(MemoryBalanceStore::new()),
            Arc::new(MemoryIdempotencyLedger::new()),
            Arc::new(RiskGate::default()),
            SettlementConfig::default(),
        )
    }

    async fn fund(p: &TransactionProcessor, account: &str, class: CoinClass, amount: i64) {
        p.settle(&SettleRequest::adjustment(
            format!("fund-{account}-{class}"),
            id(account),
            class,
            amount,
        ))
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_malformed_id_rejected_before_reservation() {
        let p = processor();
        let err = p
            .settle(&SettleRequest::fee("", id("alice"), "kick"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidTransactionId(_)));
    }

    #[tokio::test]
    async fn test_rejection_releases_reservation() {
        let p = processor();
        let request = SettleRequest::fee("fee-1", id("alice"), "kick");

        let err = p.settle(&request).await.unwrap_err();
        assert!(matches!(err, SettlementError::InsufficientFunds { .. }));
        assert!(p.lookup("fee-1").await.unwrap().is_none());

        // Top up, retry with the same id
        fund(&p, "alice", CoinClass::Purchased, 500).await;
        let receipt = p.settle(&request).await.unwrap();
        assert_eq!(receipt.balances_of(&id("alice")).unwrap().purchased, Coins::ZERO);
    }

    #[tokio::test]
    async fn test_reused_id_with_other_payload() {
        let p = processor();
        fund(&p, "alice", CoinClass::Purchased, 5000).await;
        p.settle(&SettleRequest::fee("fee-2", id("alice"), "kick"))
            .await
            .unwrap();

        let err = p
            .settle(&SettleRequest::fee("fee-2", id("alice"), "ban"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::IdempotencyMismatch(_)));
        assert_eq!(
            p.balances(&id("alice")).await.unwrap().purchased,
            Coins::from(4500)
        );
    }

    #[tokio::test]
    async fn test_outcome_tells_replay_apart() {
        let p = processor();
        let request = SettleRequest::reward("bonus-2", id("erin"), 40);

        let first = p.settle_outcome(&request).await.unwrap();
        assert!(!first.is_replay());
        let again = p.settle_outcome(&request).await.unwrap();
        assert!(again.is_replay());
        assert_eq!(again.receipt(), first.receipt());
        assert_eq!(p.balances(&id("erin")).await.unwrap().free, Coins::from(40));
    }

    #[tokio::test]
    async fn test_frozen_account_checked_before_fee_lookup() {
        let p = processor();
        p.risk()
            .freeze(&id("alice"), Some("fraud".into()), "admin")
            .await
            .unwrap();
        let err = p
            .settle(&SettleRequest::fee("fee-3", id("alice"), "teleport"))
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::AccountFrozen { .. }));
    }

    #[tokio::test]
    async fn test_frozen_receiver_can_still_receive() {
        let p = processor();
        fund(&p, "alice", CoinClass::Purchased, 100).await;
        p.risk().freeze(&id("bob"), None, "admin").await.unwrap();

        let receipt = p
            .settle(&SettleRequest::gift("gift-1", id("alice"), id("bob"), 100))
            .await
            .unwrap();
        assert_eq!(receipt.balances_of(&id("bob")).unwrap().earned, Coins::from(90));
    }

    #[tokio::test]
    async fn test_open_account_signup_bonus() {
        let p = processor();
        let (balances, created) = p.open_account(&id("carol")).await.unwrap();
        assert!(created);
        assert_eq!(balances.free, Coins::from(100));

        let (balances, created) = p.open_account(&id("carol")).await.unwrap();
        assert!(!created);
        assert_eq!(balances.free, Coins::from(100));
    }

    #[tokio::test]
    async fn test_request_metadata_kept_on_record() {
        let p = processor();
        let receipt = p
            .settle(&SettleRequest::reward("bonus-1", id("dave"), 25).with_metadata("campaign", "launch"))
            .await
            .unwrap();
        assert_eq!(receipt.record.metadata["campaign"], "launch");
        assert_eq!(receipt.record.source, None);
        assert_eq!(receipt.balances_of(&id("dave")).unwrap().free, Coins::from(25));
    }

    /// Credits free coins once, just before the next batch lands
    struct CreditBeforeApply {
        inner: MemoryBalanceStore,
        credit: std::sync::Mutex<Option<(AccountId, Coins)>>,
    }

    #[async_trait::async_trait]
    impl BalanceStore for CreditBeforeApply {
        async fn get_balances(&self, account: &AccountId) -> coinledger_store::StoreResult<Balances> {
            self.inner.get_balances(account).await
        }

        async fn apply_batch(
            &self,
            deltas: &[coinledger_store::AccountDelta],
        ) -> coinledger_store::StoreResult<BTreeMap<AccountId, Balances>> {
            let credit = self.credit.lock().unwrap().take();
            if let Some((account, coins)) = credit {
                self.inner
                    .apply_delta(&account, &coinledger_core::BalanceDelta::new().credit(CoinClass::Free, coins))
                    .await?;
            }
            self.inner.apply_batch(deltas).await
        }

        async fn open_account(
            &self,
            account: &AccountId,
            initial: Balances,
        ) -> coinledger_store::StoreResult<(Balances, bool)> {
            self.inner.open_account(account, initial).await
        }
    }

    #[tokio::test]
    async fn test_forfeit_takes_coins_credited_after_snapshot() {
        let store = Arc::new(CreditBeforeApply {
            inner: MemoryBalanceStore::new(),
            credit: std::sync::Mutex::new(None),
        });
        let p = TransactionProcessor::new(
            store.clone(),
            Arc::new(MemoryIdempotencyLedger::new()),
            Arc::new(RiskGate::default()),
            SettlementConfig::default(),
        );
        fund(&p, "alice", CoinClass::Free, 1200).await;

        // A free credit lands between the snapshot and the write
        *store.credit.lock().unwrap() = Some((id("alice"), Coins::from(300)));
        let bankrupt = SettleRequest::new(
            "spin-bankrupt",
            SettleInstruction::Reward {
                recipient: id("alice"),
                amount: 0,
                class: None,
                stake: Some(500),
                forfeit: Some(CoinClass::Free),
            },
        );
        let receipt = p.settle(&bankrupt).await.unwrap();

        assert_eq!(receipt.balances_of(&id("alice")).unwrap().free, Coins::ZERO);
        assert_eq!(receipt.record.metadata["forfeited"], 1000);
        assert_eq!(p.balances(&id("alice")).await.unwrap().free, Coins::ZERO);
    }
}
