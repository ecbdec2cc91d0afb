//! Ledger errors

use thiserror::Error;

/// Errors that can occur in ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid transaction id: {0}")]
    InvalidTransactionId(String),

    #[error("Transaction {0} was already used with a different payload")]
    FingerprintMismatch(String),

    #[error("Transaction {0} is not reserved")]
    NotReserved(String),

    #[error("Transaction {0} is still in flight")]
    InFlight(String),

    #[error("Ledger storage error: {0}")]
    Storage(String),

    #[error("Ledger serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
