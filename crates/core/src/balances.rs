//! Per-account balances and the signed adjustments applied to them

use crate::class::CoinClass;
use crate::coins::Coins;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced when a delta cannot be applied
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Insufficient {class} coins: available {available}, change {change}")]
    Overdraft {
        class: CoinClass,
        available: Coins,
        change: i64,
    },

    #[error("Balance overflow in {0}")]
    Overflow(CoinClass),
}

/// Balances of a single account
///
/// # Invariant
/// Every field is a non-negative integer. `apply` refuses any delta that
/// would drive a class below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub free: Coins,
    pub purchased: Coins,
    pub earned: Coins,
    /// Lifetime earnings credited to this account
    pub total_earned: Coins,
    /// Lifetime coins spent by this account
    pub total_spent: Coins,
}

impl Balances {
    /// Balance of one class
    pub fn get(&self, class: CoinClass) -> Coins {
        match class {
            CoinClass::Free => self.free,
            CoinClass::Purchased => self.purchased,
            CoinClass::Earned => self.earned,
        }
    }

    /// Builder-style setter for one class
    pub fn with(mut self, class: CoinClass, coins: impl Into<Coins>) -> Self {
        let coins = coins.into();
        match class {
            CoinClass::Free => self.free = coins,
            CoinClass::Purchased => self.purchased = coins,
            CoinClass::Earned => self.earned = coins,
        }
        self
    }

    /// Total coins available across the given classes (duplicates counted once)
    pub fn spendable(&self, order: &[CoinClass]) -> Coins {
        let mut seen = Vec::with_capacity(order.len());
        let mut total = 0u64;
        for class in order {
            if seen.contains(class) {
                continue;
            }
            seen.push(*class);
            total = total.saturating_add(self.get(*class).value());
        }
        Coins::from(total)
    }

    /// Apply a delta, returning the new balances.
    ///
    /// All-or-nothing: on error `self` is untouched.
    pub fn apply(&self, delta: &BalanceDelta) -> Result<Balances, BalanceError> {
        Ok(Balances {
            free: adjust(self.free, delta.free, CoinClass::Free)?,
            purchased: adjust(self.purchased, delta.purchased, CoinClass::Purchased)?,
            earned: adjust(self.earned, delta.earned, CoinClass::Earned)?,
            total_earned: self
                .total_earned
                .checked_add(delta.earned_accrued)
                .ok_or(BalanceError::Overflow(CoinClass::Earned))?,
            total_spent: self
                .total_spent
                .checked_add(delta.spent)
                .ok_or(BalanceError::Overflow(CoinClass::Purchased))?,
        })
    }
}

fn adjust(current: Coins, change: i64, class: CoinClass) -> Result<Coins, BalanceError> {
    let magnitude = Coins::from(change.unsigned_abs());
    if change >= 0 {
        current
            .checked_add(magnitude)
            .ok_or(BalanceError::Overflow(class))
    } else {
        current
            .checked_sub(magnitude)
            .ok_or(BalanceError::Overdraft {
                class,
                available: current,
                change,
            })
    }
}

fn signed(coins: Coins) -> i64 {
    i64::try_from(coins.value()).unwrap_or(i64::MAX)
}

/// Signed per-class adjustment applied atomically to one account
///
/// # Example
/// ```
/// use coinledger_core::{BalanceDelta, Balances, CoinClass, Coins};
///
/// let before = Balances::default().with(CoinClass::Purchased, 2000u64);
/// let delta = BalanceDelta::new()
///     .debit(CoinClass::Purchased, Coins::from(500))
///     .record_spent(Coins::from(500));
/// let after = before.apply(&delta).unwrap();
/// assert_eq!(after.purchased, Coins::from(1500));
/// assert_eq!(after.total_spent, Coins::from(500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub free: i64,
    pub purchased: i64,
    pub earned: i64,
    /// Increment to the lifetime earnings counter
    pub earned_accrued: Coins,
    /// Increment to the lifetime spending counter
    pub spent: Coins,
}

impl BalanceDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signed change for one class
    pub fn get(&self, class: CoinClass) -> i64 {
        match class {
            CoinClass::Free => self.free,
            CoinClass::Purchased => self.purchased,
            CoinClass::Earned => self.earned,
        }
    }

    fn slot(&mut self, class: CoinClass) -> &mut i64 {
        match class {
            CoinClass::Free => &mut self.free,
            CoinClass::Purchased => &mut self.purchased,
            CoinClass::Earned => &mut self.earned,
        }
    }

    /// Add coins to a class
    pub fn credit(mut self, class: CoinClass, coins: Coins) -> Self {
        let slot = self.slot(class);
        *slot = slot.saturating_add(signed(coins));
        self
    }

    /// Remove coins from a class
    pub fn debit(mut self, class: CoinClass, coins: Coins) -> Self {
        let slot = self.slot(class);
        *slot = slot.saturating_sub(signed(coins));
        self
    }

    /// Count coins towards lifetime earnings
    pub fn accrue_earned(mut self, coins: Coins) -> Self {
        self.earned_accrued = Coins::from(self.earned_accrued.value().saturating_add(coins.value()));
        self
    }

    /// Count coins towards lifetime spending
    pub fn record_spent(mut self, coins: Coins) -> Self {
        self.spent = Coins::from(self.spent.value().saturating_add(coins.value()));
        self
    }

    /// Combine two deltas for the same account
    pub fn merge(&self, other: &BalanceDelta) -> BalanceDelta {
        BalanceDelta {
            free: self.free.saturating_add(other.free),
            purchased: self.purchased.saturating_add(other.purchased),
            earned: self.earned.saturating_add(other.earned),
            earned_accrued: Coins::from(
                self.earned_accrued
                    .value()
                    .saturating_add(other.earned_accrued.value()),
            ),
            spent: Coins::from(self.spent.value().saturating_add(other.spent.value())),
        }
    }

    /// True if any class decreases
    pub fn is_debit(&self) -> bool {
        self.free < 0 || self.purchased < 0 || self.earned < 0
    }

    /// True if the delta changes nothing
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn balances(free: u64, purchased: u64, earned: u64) -> Balances {
        Balances::default()
            .with(CoinClass::Free, free)
            .with(CoinClass::Purchased, purchased)
            .with(CoinClass::Earned, earned)
    }

    #[test]
    fn test_apply_credit_and_debit() {
        let before = balances(100, 50, 0);
        let delta = BalanceDelta::new()
            .debit(CoinClass::Free, Coins::from(100))
            .debit(CoinClass::Purchased, Coins::from(20))
            .credit(CoinClass::Earned, Coins::from(7))
            .accrue_earned(Coins::from(7));

        let after = before.apply(&delta).unwrap();
        assert_eq!(after, {
            let mut b = balances(0, 30, 7);
            b.total_earned = Coins::from(7);
            b
        });
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let before = balances(10, 5, 0);
        let delta = BalanceDelta::new()
            .credit(CoinClass::Free, Coins::from(1000))
            .debit(CoinClass::Purchased, Coins::from(6));

        let err = before.apply(&delta).unwrap_err();
        assert_eq!(
            err,
            BalanceError::Overdraft {
                class: CoinClass::Purchased,
                available: Coins::from(5),
                change: -6,
            }
        );
        // Original untouched
        assert_eq!(before.free, Coins::from(10));
    }

    #[test]
    fn test_spendable_respects_order_subset() {
        let b = balances(100, 200, 300);
        assert_eq!(
            b.spendable(&[CoinClass::Free, CoinClass::Purchased]),
            Coins::from(300)
        );
        assert_eq!(
            b.spendable(&[CoinClass::Purchased, CoinClass::Purchased]),
            Coins::from(200)
        );
    }

    #[test]
    fn test_merge_and_flags() {
        let a = BalanceDelta::new().debit(CoinClass::Free, Coins::from(3));
        let b = BalanceDelta::new()
            .credit(CoinClass::Free, Coins::from(3))
            .record_spent(Coins::from(3));
        let merged = a.merge(&b);

        assert_eq!(merged.free, 0);
        assert_eq!(merged.spent, Coins::from(3));
        assert!(a.is_debit());
        assert!(!merged.is_debit());
        assert!(BalanceDelta::new().is_empty());
    }
}
