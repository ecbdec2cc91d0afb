//! CoinLedger Risk Gate - Pre-debit gatekeeper
//!
//! The gate keeps one risk profile per account: an accumulated risk score
//! and a freeze flag. The transaction processor consults it before every
//! debit. Profiles live in the shared settlement database so every worker
//! sees the same freezes; the JSONL log is the audit trail.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod ledger;
pub mod sqlite;
pub mod state;
pub mod store;

pub use config::RiskConfig;
pub use engine::{RiskDecision, RiskGate, RiskOverview, RiskSignal, RiskSummary};
pub use error::{RiskError, RiskResult};
pub use event::RiskEvent;
pub use ledger::RiskLedger;
pub use sqlite::SqliteRiskStore;
pub use state::{RiskProfile, RiskState};
pub use store::{MemoryRiskStore, RiskStore};
