//! Store errors

use coinledger_core::{AccountId, BalanceError, CoinClass, Coins};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Insufficient {class} funds in {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        class: CoinClass,
        available: Coins,
        requested: Coins,
    },

    #[error("Balance overflow for {account} in {class}")]
    Overflow { account: AccountId, class: CoinClass },

    #[error("Stale {class} balance in {account}: expected {expected}, found {found}")]
    Stale {
        account: AccountId,
        class: CoinClass,
        expected: Coins,
        found: Coins,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row for {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Map a balance arithmetic failure for `account` into a store error
    pub fn from_balance(account: &AccountId, err: BalanceError) -> Self {
        match err {
            BalanceError::Overdraft {
                class,
                available,
                change,
            } => StoreError::InsufficientFunds {
                account: account.clone(),
                class,
                available,
                requested: Coins::from(change.unsigned_abs()),
            },
            BalanceError::Overflow(class) => StoreError::Overflow {
                account: account.clone(),
                class,
            },
        }
    }

    /// Infrastructure fault rather than a policy rejection
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Database(_) | StoreError::Corrupt(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
