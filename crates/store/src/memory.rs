//! In-memory balance store with per-account locks

use crate::error::{StoreError, StoreResult};
use crate::traits::{expectations, merge_deltas, AccountDelta, BalanceStore};
use async_trait::async_trait;
use coinledger_core::{AccountId, Balances};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// In-memory balance store
///
/// The outer map lock is only held to look up or insert an account slot.
/// Mutations lock the touched accounts in sorted order, so two batches never
/// deadlock and batches on disjoint accounts run in parallel.
#[derive(Default)]
pub struct MemoryBalanceStore {
    accounts: RwLock<HashMap<AccountId, Arc<Mutex<Balances>>>>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn slot(&self, account: &AccountId) -> Arc<Mutex<Balances>> {
        if let Some(slot) = self.accounts.read().await.get(account) {
            return slot.clone();
        }
        self.accounts
            .write()
            .await
            .entry(account.clone())
            .or_default()
            .clone()
    }

    /// Number of known accounts
    pub async fn account_count(&self) -> usize {
        self.accounts.read().await.len()
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn get_balances(&self, account: &AccountId) -> StoreResult<Balances> {
        let slot = self.accounts.read().await.get(account).cloned();
        match slot {
            Some(slot) => Ok(*slot.lock().await),
            None => Ok(Balances::default()),
        }
    }

    async fn apply_batch(
        &self,
        deltas: &[AccountDelta],
    ) -> StoreResult<BTreeMap<AccountId, Balances>> {
        let merged = merge_deltas(deltas);

        // BTreeMap iteration is sorted: a global lock order
        let mut guards = Vec::with_capacity(merged.len());
        for account in merged.keys() {
            guards.push(self.slot(account).await.lock_owned().await);
        }

        for (account, class, expected) in expectations(deltas) {
            let found = merged
                .keys()
                .position(|a| a == account)
                .map(|i| guards[i].get(class))
                .unwrap_or_default();
            if found != expected {
                return Err(StoreError::Stale {
                    account: account.clone(),
                    class,
                    expected,
                    found,
                });
            }
        }

        let mut updated = BTreeMap::new();
        for ((account, delta), guard) in merged.iter().zip(guards.iter()) {
            let next = guard
                .apply(delta)
                .map_err(|e| StoreError::from_balance(account, e))?;
            updated.insert(account.clone(), next);
        }

        for ((account, _), guard) in merged.iter().zip(guards.iter_mut()) {
            if let Some(next) = updated.get(account) {
                **guard = *next;
            }
        }

        Ok(updated)
    }

    async fn open_account(
        &self,
        account: &AccountId,
        initial: Balances,
    ) -> StoreResult<(Balances, bool)> {
        let existing = {
            let mut accounts = self.accounts.write().await;
            match accounts.get(account) {
                Some(slot) => slot.clone(),
                None => {
                    accounts.insert(account.clone(), Arc::new(Mutex::new(initial)));
                    return Ok((initial, true));
                }
            }
        };
        let current = *existing.lock().await;
        Ok((current, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinledger_core::{BalanceDelta, CoinClass, Coins};

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    fn purchased(n: u64) -> Balances {
        Balances::default().with(CoinClass::Purchased, n)
    }

    #[tokio::test]
    async fn test_unknown_account_is_zero() {
        let store = MemoryBalanceStore::new();
        assert_eq!(store.get_balances(&id("ghost")).await.unwrap(), Balances::default());
        assert_eq!(store.account_count().await, 0);
    }

    #[tokio::test]
    async fn test_open_account_is_idempotent() {
        let store = MemoryBalanceStore::new();
        let (b, created) = store.open_account(&id("alice"), purchased(10)).await.unwrap();
        assert!(created);
        assert_eq!(b.purchased, Coins::from(10));

        let (b, created) = store.open_account(&id("alice"), purchased(99)).await.unwrap();
        assert!(!created);
        assert_eq!(b.purchased, Coins::from(10));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = MemoryBalanceStore::new();
        store.open_account(&id("alice"), purchased(100)).await.unwrap();
        store.open_account(&id("bob"), purchased(5)).await.unwrap();

        let batch = vec![
            AccountDelta::new(
                id("alice"),
                BalanceDelta::new().debit(CoinClass::Purchased, Coins::from(50)),
            ),
            AccountDelta::new(
                id("bob"),
                BalanceDelta::new().debit(CoinClass::Purchased, Coins::from(6)),
            ),
        ];

        let err = store.apply_batch(&batch).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientFunds { ref account, class: CoinClass::Purchased, .. } if account.as_str() == "bob"
        ));
        assert_eq!(
            store.get_balances(&id("alice")).await.unwrap().purchased,
            Coins::from(100)
        );
    }

    #[tokio::test]
    async fn test_expectation_checked_before_apply() {
        let store = MemoryBalanceStore::new();
        store
            .open_account(&id("alice"), Balances::default().with(CoinClass::Free, 300u64))
            .await
            .unwrap();

        let forfeit = AccountDelta::new(
            id("alice"),
            BalanceDelta::new().debit(CoinClass::Free, Coins::from(100)),
        )
        .expecting(CoinClass::Free, Coins::from(100));
        assert!(matches!(
            store.apply_batch(&[forfeit]).await,
            Err(StoreError::Stale { .. })
        ));
        assert_eq!(
            store.get_balances(&id("alice")).await.unwrap().free,
            Coins::from(300)
        );
    }

    #[tokio::test]
    async fn test_same_account_deltas_are_merged() {
        let store = MemoryBalanceStore::new();
        store.open_account(&id("alice"), purchased(10)).await.unwrap();

        // Debit 15 alone would fail; credit 10 in the same batch makes it valid
        let batch = vec![
            AccountDelta::new(
                id("alice"),
                BalanceDelta::new().debit(CoinClass::Purchased, Coins::from(15)),
            ),
            AccountDelta::new(
                id("alice"),
                BalanceDelta::new().credit(CoinClass::Purchased, Coins::from(10)),
            ),
        ];
        let updated = store.apply_batch(&batch).await.unwrap();
        assert_eq!(updated[&id("alice")].purchased, Coins::from(5));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_debits_never_overdraw() {
        let store = Arc::new(MemoryBalanceStore::new());
        let alice = id("alice");
        store.open_account(&alice, purchased(500)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..100 {
            let store = store.clone();
            let alice = alice.clone();
            handles.push(tokio::spawn(async move {
                store
                    .apply_delta(
                        &alice,
                        &BalanceDelta::new().debit(CoinClass::Purchased, Coins::from(10)),
                    )
                    .await
                    .is_ok()
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap() {
                ok += 1;
            }
        }

        assert_eq!(ok, 50);
        assert_eq!(store.get_balances(&alice).await.unwrap().purchased, Coins::ZERO);
    }
}
