//! CoinLedger Event Bus - In-process async event distribution
//!
//! Distributes settlement results to interested consumers (dashboards,
//! notification fan-out). Delivery is best effort: the JSONL journal, not
//! the bus, is the durable record.

pub mod channel;
pub mod error;
pub mod event;
pub mod subscriber;

pub use channel::EventBus;
pub use error::BusError;
pub use event::SettlementEvent;
pub use subscriber::EventSubscriber;
