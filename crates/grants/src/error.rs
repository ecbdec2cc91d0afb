//! Grant and sweeper errors

use coinledger_settlement::SettlementError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrantError {
    #[error("Grant not found: {0}")]
    NotFound(String),

    #[error("Grant {0} is not a cycle")]
    NotACycle(String),

    #[error("Grant {0} is already finalized")]
    AlreadyFinalized(String),

    #[error("Invalid grant window: {0}")]
    InvalidWindow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt grant row: {0}")]
    Corrupt(String),
}

pub type GrantResult<T> = Result<T, GrantError>;

#[derive(Error, Debug)]
pub enum SweepError {
    /// Another sweeper claimed the grant first (benign)
    #[error("Grant {0} already finalized by another sweeper")]
    GrantAlreadyFinalized(String),

    #[error("Payout for grant {grant} failed: {source}")]
    Payout {
        grant: String,
        #[source]
        source: SettlementError,
    },

    #[error("Grant store error: {0}")]
    Store(#[from] GrantError),
}

pub type SweepResult<T> = Result<T, SweepError>;
