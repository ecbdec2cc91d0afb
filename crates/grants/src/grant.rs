//! Time-bounded grants

use chrono::{DateTime, Utc};
use coinledger_core::{AccountId, Coins};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::{GrantError, GrantResult};

/// What the grant confers
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GrantKind {
    /// Officer privileges on a stream (higher spin limit, commission on fees)
    OfficerAssignment,
    /// Promotional competition that may pay out a winner
    FeatureCycle,
    /// Wheel insurance: absorbs one bankrupt result
    Insurance,
    /// Wheel prize multiplier
    Multiplier,
}

impl GrantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantKind::OfficerAssignment => "officer_assignment",
            GrantKind::FeatureCycle => "feature_cycle",
            GrantKind::Insurance => "insurance",
            GrantKind::Multiplier => "multiplier",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GrantStatus {
    Active,
    /// Claimed by a sweeper, finalization in progress
    Finalizing,
    Finalized,
    /// Used up before expiry (insurance absorbed a bankrupt)
    Consumed,
}

impl GrantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantStatus::Active => "active",
            GrantStatus::Finalizing => "finalizing",
            GrantStatus::Finalized => "finalized",
            GrantStatus::Consumed => "consumed",
        }
    }

    /// No further transitions possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, GrantStatus::Finalized | GrantStatus::Consumed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub id: String,
    pub kind: GrantKind,
    pub subject: AccountId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Set only for cycles with a payout
    pub winner: Option<AccountId>,
    /// Coins paid to the winner on finalization
    pub prize: Coins,
    pub status: GrantStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl Grant {
    /// In effect at `now`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && self.starts_at <= now && now < self.ends_at
    }

    /// Expired and not yet finalized
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && self.ends_at < now
    }

    /// Finalization issues a payout transaction
    pub fn has_payout(&self) -> bool {
        self.kind == GrantKind::FeatureCycle && self.winner.is_some() && !self.prize.is_zero()
    }

    /// Deterministic idempotency key of the winner payout
    pub fn payout_transaction_id(&self) -> String {
        format!("grant-{}-payout", self.id)
    }
}

/// Request to create a grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewGrant {
    pub kind: GrantKind,
    pub subject: AccountId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    #[serde(default)]
    pub prize: Coins,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl NewGrant {
    pub fn new(
        kind: GrantKind,
        subject: AccountId,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            subject,
            starts_at,
            ends_at,
            prize: Coins::ZERO,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_prize(mut self, prize: Coins) -> Self {
        self.prize = prize;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> GrantResult<()> {
        if self.ends_at <= self.starts_at {
            return Err(GrantError::InvalidWindow(format!(
                "ends_at {} is not after starts_at {}",
                self.ends_at, self.starts_at
            )));
        }
        if !self.prize.is_zero() && self.kind != GrantKind::FeatureCycle {
            return Err(GrantError::NotACycle(format!("{} grant with a prize", self.kind)));
        }
        Ok(())
    }

    /// Materialize with a fresh id
    pub fn into_grant(self) -> Grant {
        Grant {
            id: uuid::Uuid::new_v4().to_string(),
            kind: self.kind,
            subject: self.subject,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            winner: None,
            prize: self.prize,
            status: GrantStatus::Active,
            claimed_at: None,
            finalized_at: None,
            metadata: self.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cycle() -> NewGrant {
        let now = Utc::now();
        NewGrant::new(
            GrantKind::FeatureCycle,
            AccountId::new("stream-7").unwrap(),
            now,
            now + Duration::hours(1),
        )
        .with_prize(Coins::from(1000))
    }

    #[test]
    fn test_window_validation() {
        let mut grant = cycle();
        assert!(grant.validate().is_ok());
        grant.ends_at = grant.starts_at;
        assert!(matches!(grant.validate(), Err(GrantError::InvalidWindow(_))));
    }

    #[test]
    fn test_prize_only_on_cycles() {
        let mut grant = cycle();
        grant.kind = GrantKind::Insurance;
        assert!(matches!(grant.validate(), Err(GrantError::NotACycle(_))));
    }

    #[test]
    fn test_due_and_active() {
        let grant = cycle().into_grant();
        let inside = grant.starts_at + Duration::minutes(30);
        let after = grant.ends_at + Duration::seconds(1);

        assert!(grant.is_active_at(inside));
        assert!(!grant.is_due(inside));
        assert!(grant.is_due(after));
        assert!(!grant.is_active_at(after));
        // No winner yet
        assert!(!grant.has_payout());
        assert!(grant.payout_transaction_id().starts_with("grant-"));
    }

    #[test]
    fn test_status_strings() {
        for status in [
            GrantStatus::Active,
            GrantStatus::Finalizing,
            GrantStatus::Finalized,
            GrantStatus::Consumed,
        ] {
            assert_eq!(status.as_str().parse::<GrantStatus>().unwrap(), status);
        }
        assert!(GrantStatus::Consumed.is_terminal());
        assert_eq!(
            GrantKind::FeatureCycle.as_str().parse::<GrantKind>().unwrap(),
            GrantKind::FeatureCycle
        );
    }
}
