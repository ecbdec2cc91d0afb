//! Prize tables

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::{ChanceError, ChanceResult};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PrizeKind {
    /// Credit `value` coins
    Coins,
    Nothing,
    /// Grant that absorbs one bankrupt result
    Insurance,
    /// Grant that multiplies coin prizes by `value`
    Multiplier,
    /// Forfeit the free balance
    Bankrupt,
    /// Badge award, no coins
    Jackpot,
}

/// One wheel segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prize {
    pub id: String,
    pub label: String,
    pub kind: PrizeKind,
    #[serde(default)]
    pub value: u64,
    /// Relative probability weight
    pub weight: f64,
}

impl Prize {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        kind: PrizeKind,
        value: u64,
        weight: f64,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind,
            value,
            weight,
        }
    }

    /// Coins credited before any multiplier
    pub fn coins(&self) -> u64 {
        match self.kind {
            PrizeKind::Coins => self.value,
            _ => 0,
        }
    }
}

/// Ordered list of prizes. Order is part of the draw contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrizeTable(Vec<Prize>);

impl PrizeTable {
    pub fn new(prizes: Vec<Prize>) -> Self {
        Self(prizes)
    }

    /// The standard wheel
    pub fn default_wheel() -> Self {
        Self(vec![
            Prize::new("coins_750", "750 Coins", PrizeKind::Coins, 750, 28.0),
            Prize::new("nothing", "Better luck next time", PrizeKind::Nothing, 0, 23.0),
            Prize::new("insurance", "Bankrupt Insurance", PrizeKind::Insurance, 1, 10.0),
            Prize::new("coins_200", "200 Coins", PrizeKind::Coins, 200, 14.0),
            Prize::new("multiplier_2x", "2x Multiplier", PrizeKind::Multiplier, 2, 9.0),
            Prize::new("bankrupt", "Bankrupt", PrizeKind::Bankrupt, 0, 5.0),
            Prize::new("coins_5000", "5000 Coins", PrizeKind::Coins, 5000, 7.0),
            Prize::new("coins_1000000", "1,000,000 Coins", PrizeKind::Coins, 1_000_000, 2.0),
            Prize::new("jackpot_crown", "Jackpot Crown", PrizeKind::Jackpot, 0, 2.0),
        ])
    }

    pub fn prizes(&self) -> &[Prize] {
        &self.0
    }

    pub fn get(&self, id: &str) -> Option<&Prize> {
        self.0.iter().find(|p| p.id == id)
    }

    pub fn total_weight(&self) -> f64 {
        self.0.iter().map(|p| p.weight).sum()
    }

    /// Weights must be finite and non-negative, with a positive total
    pub fn validate(&self) -> ChanceResult<()> {
        for prize in &self.0 {
            if !prize.weight.is_finite() || prize.weight < 0.0 {
                return Err(ChanceError::InvalidWeight {
                    prize: prize.id.clone(),
                    weight: prize.weight,
                });
            }
        }
        if self.total_weight() <= 0.0 {
            return Err(ChanceError::EmptyTable);
        }
        Ok(())
    }
}

impl Default for PrizeTable {
    fn default() -> Self {
        Self::default_wheel()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_wheel() {
        let table = PrizeTable::default_wheel();
        assert!(table.validate().is_ok());
        assert_eq!(table.prizes().len(), 9);
        assert_eq!(table.total_weight(), 100.0);
        assert_eq!(table.get("coins_5000").unwrap().coins(), 5000);
        assert_eq!(table.get("multiplier_2x").unwrap().coins(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_weights() {
        let negative = PrizeTable::new(vec![Prize::new("a", "A", PrizeKind::Nothing, 0, -1.0)]);
        assert!(matches!(
            negative.validate(),
            Err(ChanceError::InvalidWeight { .. })
        ));

        let zero = PrizeTable::new(vec![Prize::new("a", "A", PrizeKind::Nothing, 0, 0.0)]);
        assert!(matches!(zero.validate(), Err(ChanceError::EmptyTable)));

        let nan = PrizeTable::new(vec![Prize::new("a", "A", PrizeKind::Nothing, 0, f64::NAN)]);
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_table_json_shape() {
        let json = r#"[{"id":"x","label":"X","kind":"coins","value":5,"weight":1.5}]"#;
        let table: PrizeTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.prizes()[0].kind, PrizeKind::Coins);
        assert_eq!(table.prizes()[0].weight, 1.5);
    }
}
