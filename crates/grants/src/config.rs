//! Sweeper configuration

use coinledger_core::CoinClass;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the Expiry Sweeper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweeps
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Class credited to cycle winners
    #[serde(default = "default_payout_class")]
    pub payout_class: CoinClass,

    /// A claim older than this is considered abandoned and may be re-claimed
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_payout_class() -> CoinClass {
    CoinClass::Earned
}

fn default_claim_lease_secs() -> u64 {
    300 // 5 minutes
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            payout_class: default_payout_class(),
            claim_lease_secs: default_claim_lease_secs(),
        }
    }
}

impl SweeperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(u32::try_from(self.claim_lease_secs).unwrap_or(u32::MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: SweeperConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.interval(), Duration::from_secs(60));
        assert_eq!(config.payout_class, CoinClass::Earned);
        assert_eq!(config.claim_lease(), chrono::Duration::minutes(5));
    }
}
