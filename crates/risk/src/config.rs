//! Risk gate configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RiskResult;

/// Configuration for the Risk Gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Score at which an account is frozen automatically.
    /// `None` disables automatic freezes; only administrators freeze.
    #[serde(default)]
    pub auto_freeze_threshold: Option<u64>,

    /// Number of accounts listed by the risk overview
    #[serde(default = "default_overview_top_n")]
    pub overview_top_n: usize,
}

fn default_overview_top_n() -> usize {
    10
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            auto_freeze_threshold: None,
            overview_top_n: default_overview_top_n(),
        }
    }
}

impl RiskConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> RiskResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Enable automatic freezing at the given score
    pub fn with_auto_freeze(mut self, threshold: u64) -> Self {
        self.auto_freeze_threshold = Some(threshold);
        self
    }
}
