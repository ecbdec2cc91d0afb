//! Chance errors

use coinledger_core::AccountId;
use coinledger_grants::GrantError;
use coinledger_settlement::SettlementError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChanceError {
    #[error("Prize table is empty or has no positive weight")]
    EmptyTable,

    #[error("Invalid weight {weight} for prize {prize}")]
    InvalidWeight { prize: String, weight: f64 },

    #[error("Invalid game: {0}")]
    InvalidGame(String),

    #[error("Unknown game: {0}")]
    UnknownGame(String),

    #[error("{account} reached the daily limit of {limit} spins")]
    SpinLimitReached { account: AccountId, limit: u32 },

    #[error("Draw {0} was already used for a different spin")]
    DrawMismatch(String),

    #[error("Draw {0} is still being processed")]
    InFlight(String),

    #[error(transparent)]
    Settlement(#[from] SettlementError),

    #[error("Grant error: {0}")]
    Grant(#[from] GrantError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt spin row: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ChanceResult<T> = Result<T, ChanceError>;
