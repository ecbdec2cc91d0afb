//! CoinLedger Events - JSONL transaction journal
//!
//! Every settlement attempt, committed or rejected, is appended here as one
//! JSON line. The journal is the audit trail; balances live in the store.

pub mod error;
pub mod reader;
pub mod store;

pub use error::EventError;
pub use reader::EventReader;
pub use store::EventStore;
