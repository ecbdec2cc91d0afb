//! CoinLedger Store - Balance storage
//!
//! The balance store is the serialization point for every account: each
//! `apply_batch` call is applied as one all-or-nothing unit, and concurrent
//! callers touching the same account are linearized. Unrelated accounts never
//! wait on each other in the in-memory store.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryBalanceStore;
pub use sqlite::SqliteStore;
pub use traits::{expectations, merge_deltas, AccountDelta, BalanceStore};
