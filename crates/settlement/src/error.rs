//! Settlement errors

use coinledger_core::{AccountId, Coins};
use coinledger_ledger::LedgerError;
use coinledger_risk::RiskError;
use coinledger_store::StoreError;
use thiserror::Error;

/// Why a settlement was rejected.
///
/// A duplicate transaction id is not an error: the processor returns the
/// stored receipt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Account {account} is frozen")]
    AccountFrozen {
        account: AccountId,
        reason: Option<String>,
    },

    #[error("Unknown fee code: {0}")]
    UnknownFee(String),

    #[error("Insufficient funds in {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        available: Coins,
        requested: Coins,
    },

    #[error("Source and destination are the same account: {0}")]
    SelfTransfer(AccountId),

    #[error("Transaction {0} was already used with a different request")]
    IdempotencyMismatch(String),

    #[error("Transaction {0} is still being processed")]
    InFlight(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl SettlementError {
    /// Stable machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            SettlementError::InvalidTransactionId(_) => "invalid_transaction_id",
            SettlementError::InvalidAmount(_) => "invalid_amount",
            SettlementError::AccountFrozen { .. } => "account_frozen",
            SettlementError::UnknownFee(_) => "unknown_fee",
            SettlementError::InsufficientFunds { .. } => "insufficient_funds",
            SettlementError::SelfTransfer(_) => "self_transfer",
            SettlementError::IdempotencyMismatch(_) => "idempotency_mismatch",
            SettlementError::InFlight(_) => "in_flight",
            SettlementError::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    /// Infrastructure faults the caller should retry with backoff (same id)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SettlementError::StorageUnavailable(_) | SettlementError::InFlight(_)
        )
    }
}

impl From<LedgerError> for SettlementError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidTransactionId(id) => SettlementError::InvalidTransactionId(id),
            LedgerError::FingerprintMismatch(id) => SettlementError::IdempotencyMismatch(id),
            LedgerError::InFlight(id) => SettlementError::InFlight(id),
            other => SettlementError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<StoreError> for SettlementError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientFunds {
                account,
                available,
                requested,
                ..
            } => SettlementError::InsufficientFunds {
                account,
                available,
                requested,
            },
            StoreError::Overflow { account, class } => {
                SettlementError::InvalidAmount(format!("{class} balance of {account} would overflow"))
            }
            other => SettlementError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<RiskError> for SettlementError {
    fn from(err: RiskError) -> Self {
        SettlementError::StorageUnavailable(err.to_string())
    }
}

pub type SettlementResult<T> = Result<T, SettlementError>;

/// Errors loading settlement configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinledger_core::CoinClass;

    #[test]
    fn test_ledger_errors_map_to_taxonomy() {
        assert_eq!(
            SettlementError::from(LedgerError::FingerprintMismatch("t1".into())).code(),
            "idempotency_mismatch"
        );
        assert!(SettlementError::from(LedgerError::Storage("disk".into())).is_retryable());
        assert!(SettlementError::from(LedgerError::InFlight("t1".into())).is_retryable());
    }

    #[test]
    fn test_store_insufficient_funds_keeps_details() {
        let alice = AccountId::new("alice").unwrap();
        let err = SettlementError::from(StoreError::InsufficientFunds {
            account: alice.clone(),
            class: CoinClass::Purchased,
            available: Coins::from(300),
            requested: Coins::from(2000),
        });
        assert_eq!(
            err,
            SettlementError::InsufficientFunds {
                account: alice,
                available: Coins::from(300),
                requested: Coins::from(2000),
            }
        );
        assert!(!err.is_retryable());
    }
}
