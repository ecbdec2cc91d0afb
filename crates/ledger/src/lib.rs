//! CoinLedger Ledger - Transaction records and idempotency
//!
//! Every settlement attempt is identified by a client-supplied `TransactionId`.
//! The idempotency ledger guarantees that one id commits at most once and that
//! replays return the original receipt without touching balances again.
//!
//! # Key Types
//! - `TransactionId`: Validated idempotency key
//! - `TransactionRecord`: One settlement attempt (committed or rejected)
//! - `SettlementReceipt`: Committed record plus post-settlement balances
//! - `IdempotencyLedger`: beginOrGet / commit / release contract

pub mod error;
pub mod hash;
pub mod idempotency;
pub mod transaction;

pub use error::{LedgerError, LedgerResult};
pub use hash::fingerprint;
pub use idempotency::{IdempotencyLedger, MemoryIdempotencyLedger, Reservation, IN_FLIGHT_WAIT};
pub use transaction::{
    SettlementReceipt, TransactionId, TransactionKind, TransactionRecord, TransactionStatus,
};
