//! Balance store contract

use crate::error::StoreResult;
use async_trait::async_trait;
use coinledger_core::{AccountId, BalanceDelta, Balances, CoinClass, Coins};
use std::collections::BTreeMap;

/// A delta addressed to one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDelta {
    pub account: AccountId,
    pub delta: BalanceDelta,
    /// Balance a class must hold right before the batch applies
    pub expected: Option<(CoinClass, Coins)>,
}

impl AccountDelta {
    pub fn new(account: AccountId, delta: BalanceDelta) -> Self {
        Self {
            account,
            delta,
            expected: None,
        }
    }

    /// Apply only if `class` still holds `coins`; otherwise the batch fails
    /// with `StoreError::Stale`
    pub fn expecting(mut self, class: CoinClass, coins: Coins) -> Self {
        self.expected = Some((class, coins));
        self
    }
}

/// Balance expectations carried by a batch, in input order
pub fn expectations(deltas: &[AccountDelta]) -> Vec<(&AccountId, CoinClass, Coins)> {
    deltas
        .iter()
        .filter_map(|d| d.expected.map(|(class, coins)| (&d.account, class, coins)))
        .collect()
}

/// Group deltas by account (sorted), merging repeats
pub fn merge_deltas(deltas: &[AccountDelta]) -> BTreeMap<AccountId, BalanceDelta> {
    let mut merged: BTreeMap<AccountId, BalanceDelta> = BTreeMap::new();
    for item in deltas {
        merged
            .entry(item.account.clone())
            .and_modify(|d| *d = d.merge(&item.delta))
            .or_insert(item.delta);
    }
    merged
}

/// Persistent per-account balances split by coin class
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Current balances (zero for unknown accounts)
    async fn get_balances(&self, account: &AccountId) -> StoreResult<Balances>;

    /// Apply deltas to one or more accounts as a single atomic unit.
    ///
    /// Fails with `InsufficientFunds` if any class of any account would go
    /// negative, or `Stale` if an expected balance no longer holds; in either
    /// case nothing is applied. Returns the new balances of
    /// every touched account.
    async fn apply_batch(
        &self,
        deltas: &[AccountDelta],
    ) -> StoreResult<BTreeMap<AccountId, Balances>>;

    /// Apply a delta to a single account
    async fn apply_delta(&self, account: &AccountId, delta: &BalanceDelta) -> StoreResult<Balances> {
        let mut updated = self
            .apply_batch(&[AccountDelta::new(account.clone(), *delta)])
            .await?;
        Ok(updated.remove(account).unwrap_or_default())
    }

    /// Create an account with initial balances if it does not exist.
    ///
    /// Returns the account's balances and whether it was created by this call.
    async fn open_account(
        &self,
        account: &AccountId,
        initial: Balances,
    ) -> StoreResult<(Balances, bool)>;
}
