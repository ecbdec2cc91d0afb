//! CoinLedger Grants - Time-bounded privileges and promotional cycles
//!
//! A grant lives between `starts_at` and `ends_at`. Once `ends_at` has
//! passed, the expiry sweeper finalizes it exactly once: an atomic claim
//! picks a single finalizer, and cycles with a winner are paid out through
//! the transaction processor.

pub mod config;
pub mod error;
pub mod grant;
pub mod memory;
pub mod sqlite;
pub mod store;
pub mod sweeper;

pub use config::SweeperConfig;
pub use error::{GrantError, GrantResult, SweepError, SweepResult};
pub use grant::{Grant, GrantKind, GrantStatus, NewGrant};
pub use memory::MemoryGrantStore;
pub use sqlite::SqliteGrantStore;
pub use store::GrantStore;
pub use sweeper::{ExpirySweeper, FinalizeOutcome, SweepReport};
