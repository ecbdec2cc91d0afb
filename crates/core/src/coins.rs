//! Coins - Non-negative integer wrapper for virtual currency amounts
//!
//! Every balance and every settled amount in CoinLedger is a whole number
//! of coins. Negative values are unrepresentable.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors that can occur when working with coin amounts
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoinsError {
    #[error("Coin amount cannot be negative: {0}")]
    Negative(i64),

    #[error("Coin rate must be between 0 and 1: {0}")]
    InvalidRate(Decimal),
}

/// A non-negative number of coins.
///
/// # Invariant
/// The inner value is always >= 0. Signed inputs go through [`Coins::new`].
///
/// # Example
/// ```
/// use coinledger_core::Coins;
///
/// let coins = Coins::new(500).unwrap();
/// assert_eq!(coins.value(), 500);
///
/// // Negative amounts are rejected
/// assert!(Coins::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coins(u64);

impl Coins {
    /// Zero coins constant
    pub const ZERO: Self = Self(0);

    /// Create coins from a signed value.
    ///
    /// Returns an error if the value is negative.
    pub fn new(value: i64) -> Result<Self, CoinsError> {
        u64::try_from(value)
            .map(Self)
            .map_err(|_| CoinsError::Negative(value))
    }

    /// Get the inner value
    #[inline]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Check if the amount is zero
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition - returns None on overflow
    pub fn checked_add(&self, other: Coins) -> Option<Coins> {
        self.0.checked_add(other.0).map(Coins)
    }

    /// Checked subtraction - returns None if result would be negative
    pub fn checked_sub(&self, other: Coins) -> Option<Coins> {
        self.0.checked_sub(other.0).map(Coins)
    }

    /// Subtraction that stops at zero
    pub fn saturating_sub(&self, other: Coins) -> Coins {
        Coins(self.0.saturating_sub(other.0))
    }

    /// Smaller of two amounts
    pub fn min(self, other: Coins) -> Coins {
        Coins(self.0.min(other.0))
    }

    /// Take a fractional share of this amount, rounded down.
    ///
    /// `rate` must lie in `[0, 1]`, so the share never exceeds the original.
    pub fn share(&self, rate: Decimal) -> Result<Coins, CoinsError> {
        if rate < Decimal::ZERO || rate > Decimal::ONE {
            return Err(CoinsError::InvalidRate(rate));
        }
        let share = (Decimal::from(self.0) * rate).floor();
        // floor(x * r) <= x for r in [0, 1]
        Ok(Coins(share.to_u64().unwrap_or(self.0).min(self.0)))
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Coins {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Coins> for u64 {
    fn from(coins: Coins) -> Self {
        coins.0
    }
}

impl TryFrom<i64> for Coins {
    type Error = CoinsError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_coins_positive() {
        let coins = Coins::new(100).unwrap();
        assert_eq!(coins.value(), 100);
    }

    #[test]
    fn test_coins_zero() {
        assert!(Coins::new(0).unwrap().is_zero());
    }

    #[test]
    fn test_coins_negative_rejected() {
        assert_eq!(Coins::new(-5), Err(CoinsError::Negative(-5)));
    }

    #[test]
    fn test_checked_sub_prevents_negative() {
        assert!(Coins::from(50).checked_sub(Coins::from(100)).is_none());
        assert_eq!(
            Coins::from(100).checked_sub(Coins::from(30)),
            Some(Coins::from(70))
        );
    }

    #[test]
    fn test_share_rounds_down() {
        assert_eq!(Coins::from(105).share(dec!(0.10)).unwrap(), Coins::from(10));
        assert_eq!(Coins::from(9).share(dec!(0.10)).unwrap(), Coins::ZERO);
        assert_eq!(Coins::from(500).share(dec!(0.30)).unwrap(), Coins::from(150));
        assert_eq!(Coins::from(7).share(Decimal::ONE).unwrap(), Coins::from(7));
    }

    #[test]
    fn test_share_rejects_out_of_range_rate() {
        assert!(Coins::from(10).share(dec!(1.5)).is_err());
        assert!(Coins::from(10).share(dec!(-0.1)).is_err());
    }

    #[test]
    fn test_serde_is_plain_number() {
        let json = serde_json::to_string(&Coins::from(1500)).unwrap();
        assert_eq!(json, "1500");
        assert!(serde_json::from_str::<Coins>("-3").is_err());
    }
}
