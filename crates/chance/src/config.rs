//! Wheel configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ChanceError, ChanceResult};
use crate::prize::PrizeTable;

/// One game: its spin cost and prize table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameConfig {
    /// Free coins charged per spin
    pub cost: u64,
    #[serde(default)]
    pub prizes: PrizeTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WheelConfig {
    /// Games keyed by game id
    #[serde(default = "default_games")]
    pub games: BTreeMap<String, GameConfig>,

    #[serde(default = "default_daily_spin_limit")]
    pub daily_spin_limit: u32,

    /// Limit for holders of an active officer assignment
    #[serde(default = "default_officer_daily_spin_limit")]
    pub officer_daily_spin_limit: u32,

    /// Lifetime of a multiplier grant
    #[serde(default = "default_multiplier_minutes")]
    pub multiplier_minutes: i64,

    /// Lifetime of an insurance grant
    #[serde(default = "default_insurance_hours")]
    pub insurance_hours: i64,

    /// Age after which a pending spin of a crashed worker may be taken over
    #[serde(default = "default_spin_lease_secs")]
    pub spin_lease_secs: u64,
}

pub const DEFAULT_GAME: &str = "wheel";

fn default_games() -> BTreeMap<String, GameConfig> {
    BTreeMap::from([(
        DEFAULT_GAME.to_string(),
        GameConfig {
            cost: 500,
            prizes: PrizeTable::default_wheel(),
        },
    )])
}

fn default_daily_spin_limit() -> u32 {
    10
}

fn default_officer_daily_spin_limit() -> u32 {
    15
}

fn default_multiplier_minutes() -> i64 {
    30
}

fn default_insurance_hours() -> i64 {
    24
}

fn default_spin_lease_secs() -> u64 {
    60
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            games: default_games(),
            daily_spin_limit: default_daily_spin_limit(),
            officer_daily_spin_limit: default_officer_daily_spin_limit(),
            multiplier_minutes: default_multiplier_minutes(),
            insurance_hours: default_insurance_hours(),
            spin_lease_secs: default_spin_lease_secs(),
        }
    }
}

impl WheelConfig {
    /// Load from a JSON file and validate
    pub fn from_file(path: impl AsRef<Path>) -> ChanceResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ChanceResult<()> {
        for (id, game) in &self.games {
            if game.cost == 0 {
                return Err(ChanceError::InvalidGame(format!("{id}: cost must be positive")));
            }
            game.prizes.validate()?;
        }
        Ok(())
    }

    pub fn game(&self, game_id: &str) -> ChanceResult<&GameConfig> {
        self.games
            .get(game_id)
            .ok_or_else(|| ChanceError::UnknownGame(game_id.to_string()))
    }

    pub fn with_game(mut self, game_id: impl Into<String>, game: GameConfig) -> Self {
        self.games.insert(game_id.into(), game);
        self
    }

    pub fn multiplier_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.multiplier_minutes.clamp(1, 7 * 24 * 60))
    }

    pub fn insurance_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.insurance_hours.clamp(1, 365 * 24))
    }

    pub fn spin_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(u32::try_from(self.spin_lease_secs).unwrap_or(u32::MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: WheelConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.game("wheel").unwrap().cost, 500);
        assert_eq!(config.daily_spin_limit, 10);
        assert_eq!(config.officer_daily_spin_limit, 15);
        assert_eq!(config.multiplier_duration(), chrono::Duration::minutes(30));
        assert_eq!(config.insurance_duration(), chrono::Duration::hours(24));
        assert_eq!(config.spin_lease(), chrono::Duration::seconds(60));
        assert!(matches!(config.game("slots"), Err(ChanceError::UnknownGame(_))));
    }

    #[test]
    fn test_custom_game_uses_default_table() {
        let config: WheelConfig =
            serde_json::from_str(r#"{"games":{"mini":{"cost":50}}}"#).unwrap();
        assert!(config.game("wheel").is_err());
        assert_eq!(config.game("mini").unwrap().prizes, PrizeTable::default_wheel());
        assert!(config.validate().is_ok());
    }
}
