//! CoinLedger Chance - Weighted draws and the prize wheel
//!
//! `draw` picks one entry from a weighted table using an injected random
//! source. `Wheel` turns a draw into a single reward settlement: the spin
//! cost and the prize move in one transaction, so a spin the player cannot
//! afford commits nothing. Each draw id is reserved in the spin log before
//! the prize is rolled; the log also carries the daily spin count.

pub mod config;
pub mod draw;
pub mod error;
pub mod prize;
pub mod spins;
pub mod sqlite;
pub mod wheel;

pub use config::{GameConfig, WheelConfig};
pub use draw::draw;
pub use error::{ChanceError, ChanceResult};
pub use prize::{Prize, PrizeKind, PrizeTable};
pub use spins::{MemorySpinLog, SpinLog, SpinRecord, SpinReservation, SpinStatus};
pub use sqlite::SqliteSpinLog;
pub use wheel::{SpinOutcome, Wheel};
