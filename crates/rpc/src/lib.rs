//! CoinLedger RPC - Service wiring and CLI
//!
//! `AppContext` opens a data directory (SQLite ledger, JSONL journal, risk
//! log) and exposes the request surface: settle, freeze, unfreeze, risk
//! overview, draw and sweep.

pub mod commands;
pub mod config;
pub mod context;

pub use config::AppConfig;
pub use context::{AppContext, ServiceError};
