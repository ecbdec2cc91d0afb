//! CoinLedger Core - Domain types
//!
//! This crate contains the fundamental types used across CoinLedger:
//! - `Coins`: Non-negative integer wrapper for coin amounts
//! - `CoinClass`: The three balance classes (free, purchased, earned)
//! - `AccountId`: Validated account identifier
//! - `Balances` / `BalanceDelta`: Per-account balances and atomic adjustments

pub mod account;
pub mod balances;
pub mod class;
pub mod coins;

pub use account::{AccountId, AccountIdError};
pub use balances::{BalanceDelta, BalanceError, Balances};
pub use class::CoinClass;
pub use coins::{Coins, CoinsError};
