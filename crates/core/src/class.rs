//! Coin classes
//!
//! Balances are split by how the coins entered the account. Fees may only
//! draw from `Purchased`; gifts draw in a configured priority order.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// Balance class of a coin
///
/// # Examples
/// ```
/// use coinledger_core::CoinClass;
///
/// let class: CoinClass = "purchased".parse().unwrap();
/// assert_eq!(class, CoinClass::Purchased);
/// assert_eq!(CoinClass::Free.to_string(), "free");
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CoinClass {
    /// Promotional coins (signup bonus, wheel prizes)
    Free,
    /// Coins bought with real money - the only class eligible for fees
    Purchased,
    /// Coins received as gifts and rewards, eligible for cashout
    Earned,
}

impl CoinClass {
    /// Column name used by the SQL store
    pub fn column(&self) -> &'static str {
        match self {
            CoinClass::Free => "free",
            CoinClass::Purchased => "purchased",
            CoinClass::Earned => "earned",
        }
    }
}
