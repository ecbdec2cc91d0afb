//! Risk events (written to the risk audit log)
//!
//! Every freeze decision and every score change is an event. Profiles are
//! a fold over these events.

use chrono::{DateTime, Utc};
use coinledger_core::AccountId;
use serde::{Deserialize, Serialize};

/// Actor recorded for freezes triggered by the score threshold
pub const AUTO_ACTOR: &str = "auto";

/// Events appended to the risk audit log (append-only JSONL)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum RiskEvent {
    /// Account frozen (or re-frozen with a new reason)
    Frozen {
        account: AccountId,
        reason: Option<String>,
        performed_by: String,
        timestamp: DateTime<Utc>,
    },

    /// Account unfrozen
    Unfrozen {
        account: AccountId,
        performed_by: String,
        timestamp: DateTime<Utc>,
    },

    /// Fraud signal accumulated into the score
    ScoreRaised {
        account: AccountId,
        signal: String,
        points: u64,
        timestamp: DateTime<Utc>,
    },
}

impl RiskEvent {
    pub fn frozen(account: AccountId, reason: Option<String>, performed_by: impl Into<String>) -> Self {
        Self::Frozen {
            account,
            reason,
            performed_by: performed_by.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn unfrozen(account: AccountId, performed_by: impl Into<String>) -> Self {
        Self::Unfrozen {
            account,
            performed_by: performed_by.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn score_raised(account: AccountId, signal: impl Into<String>, points: u64) -> Self {
        Self::ScoreRaised {
            account,
            signal: signal.into(),
            points,
            timestamp: Utc::now(),
        }
    }

    /// Account the event applies to
    pub fn account(&self) -> &AccountId {
        match self {
            RiskEvent::Frozen { account, .. }
            | RiskEvent::Unfrozen { account, .. }
            | RiskEvent::ScoreRaised { account, .. } => account,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RiskEvent::Frozen { timestamp, .. }
            | RiskEvent::Unfrozen { timestamp, .. }
            | RiskEvent::ScoreRaised { timestamp, .. } => *timestamp,
        }
    }
}
