//! Risk gate errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiskError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt risk log at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Invalid risk signal: {0}")]
    InvalidSignal(String),
}

pub type RiskResult<T> = Result<T, RiskError>;
