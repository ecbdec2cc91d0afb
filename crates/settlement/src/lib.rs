//! CoinLedger Settlement - The transaction processor
//!
//! Turns an inbound economic event (gift, fee, reward, payout, adjustment)
//! into exactly one atomic balance mutation:
//!
//! ```text
//! received -> idempotency check -> [replay] | risk check -> [frozen]
//!          -> amount computation -> balance mutation -> committed | rejected
//! ```

pub mod config;
pub mod error;
mod plan;
pub mod processor;
pub mod request;

pub use config::{FeeSchedule, PayoutPolicy, SettlementConfig};
pub use error::{ConfigError, SettlementError, SettlementResult};
pub use processor::{SettleOutcome, TransactionProcessor};
pub use request::{SettleInstruction, SettleRequest, SettleResponse};
