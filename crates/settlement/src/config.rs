//! Settlement configuration
//!
//! Fee schedule, commission rates and funding rules are loaded once at
//! startup and injected into the processor.

use coinledger_core::{CoinClass, Coins};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use strum_macros::{Display, EnumString};

use crate::error::ConfigError;

/// Which balances a cashout may draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PayoutPolicy {
    /// Only earned coins are cashable
    #[default]
    EarnedOnly,
    /// Earned coins first, then purchased
    EarnedThenPurchased,
}

impl PayoutPolicy {
    /// Draw-down order for this policy
    pub fn classes(&self) -> &'static [CoinClass] {
        match self {
            PayoutPolicy::EarnedOnly => &[CoinClass::Earned],
            PayoutPolicy::EarnedThenPurchased => &[CoinClass::Earned, CoinClass::Purchased],
        }
    }
}

/// Fee code -> fixed coin amount, charged from purchased coins only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeeSchedule(BTreeMap<String, i64>);

impl FeeSchedule {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with_fee(mut self, code: impl Into<String>, amount: i64) -> Self {
        self.0.insert(code.into(), amount);
        self
    }

    /// Amount for `code`; `None` if the code is absent or not positive
    pub fn lookup(&self, code: &str) -> Option<Coins> {
        self.0
            .get(code)
            .filter(|amount| **amount > 0)
            .and_then(|amount| Coins::new(*amount).ok())
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::new()
            .with_fee("kick", 500)
            .with_fee("ban", 2000)
            .with_fee("mute", 25)
            .with_fee("family_create", 1000)
    }
}

/// Configuration for the Transaction Processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Platform cut of every gift
    #[serde(default = "default_gift_commission_rate")]
    pub gift_commission_rate: Decimal,

    /// Sender classes drawn for gifts, in order
    #[serde(default = "default_gift_funding_order")]
    pub gift_funding_order: Vec<CoinClass>,

    #[serde(default)]
    pub fees: FeeSchedule,

    /// Share of an enforcement fee credited to the acting officer
    #[serde(default = "default_officer_commission_rate")]
    pub officer_commission_rate: Decimal,

    #[serde(default)]
    pub payout_policy: PayoutPolicy,

    /// Share of a payout withheld as processing fee
    #[serde(default)]
    pub payout_processing_fee_rate: Decimal,

    /// Class credited by rewards that do not name one
    #[serde(default = "default_reward_class")]
    pub reward_class: CoinClass,

    /// Free coins granted when an account is opened
    #[serde(default = "default_signup_bonus")]
    pub signup_bonus: u64,

    /// Attempts when a concurrent debit invalidates the balance snapshot
    #[serde(default = "default_max_settle_attempts")]
    pub max_settle_attempts: u32,
}

fn default_gift_commission_rate() -> Decimal {
    Decimal::new(10, 2)
}

fn default_gift_funding_order() -> Vec<CoinClass> {
    vec![CoinClass::Free, CoinClass::Purchased]
}

fn default_officer_commission_rate() -> Decimal {
    Decimal::new(30, 2)
}

fn default_reward_class() -> CoinClass {
    CoinClass::Free
}

fn default_signup_bonus() -> u64 {
    100
}

fn default_max_settle_attempts() -> u32 {
    3
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            gift_commission_rate: default_gift_commission_rate(),
            gift_funding_order: default_gift_funding_order(),
            fees: FeeSchedule::default(),
            officer_commission_rate: default_officer_commission_rate(),
            payout_policy: PayoutPolicy::default(),
            payout_processing_fee_rate: Decimal::ZERO,
            reward_class: default_reward_class(),
            signup_bonus: default_signup_bonus(),
            max_settle_attempts: default_max_settle_attempts(),
        }
    }
}

impl SettlementConfig {
    /// Load and validate configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, rate) in [
            ("gift_commission_rate", self.gift_commission_rate),
            ("officer_commission_rate", self.officer_commission_rate),
            ("payout_processing_fee_rate", self.payout_processing_fee_rate),
        ] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 0 and 1, got {rate}"
                )));
            }
        }
        if self.gift_funding_order.is_empty() {
            return Err(ConfigError::Invalid(
                "gift_funding_order must name at least one class".to_string(),
            ));
        }
        if self.max_settle_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_settle_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_fee(mut self, code: impl Into<String>, amount: i64) -> Self {
        self.fees = self.fees.with_fee(code, amount);
        self
    }

    pub fn with_payout_policy(mut self, policy: PayoutPolicy) -> Self {
        self.payout_policy = policy;
        self
    }
}
