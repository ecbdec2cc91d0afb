//! Service configuration, loaded once at startup

use anyhow::Context;
use coinledger_chance::WheelConfig;
use coinledger_grants::SweeperConfig;
use coinledger_risk::RiskConfig;
use coinledger_settlement::SettlementConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name looked up in the data directory
pub const CONFIG_FILE: &str = "coinledger.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub wheel: WheelConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// `<data>/coinledger.json` if present, defaults otherwise
    pub fn load(data_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = data_path.as_ref().join(CONFIG_FILE);
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.settlement.validate()?;
        self.wheel.validate()?;
        Ok(())
    }
}
