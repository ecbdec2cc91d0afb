//! Transaction identifiers, records and receipts

use crate::error::LedgerError;
use chrono::{DateTime, Utc};
use coinledger_core::{AccountId, Balances, Coins};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};

/// Maximum accepted idempotency key length
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

/// Client-chosen idempotency key, globally unique per logical action
///
/// # Examples
/// ```
/// use coinledger_ledger::TransactionId;
///
/// assert!(TransactionId::parse("gift:alice:1700000000:500").is_ok());
/// assert!(TransactionId::parse("").is_err());
/// assert!(TransactionId::parse("has space").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TransactionId(String);

impl TransactionId {
    /// Validate a raw key
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, LedgerError> {
        let raw = raw.as_ref();
        if raw.is_empty() {
            return Err(LedgerError::InvalidTransactionId("empty".to_string()));
        }
        if raw.len() > MAX_TRANSACTION_ID_LEN {
            return Err(LedgerError::InvalidTransactionId(format!(
                "longer than {MAX_TRANSACTION_ID_LEN} chars"
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.' | '@'))
        {
            return Err(LedgerError::InvalidTransactionId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TransactionId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TransactionId {
    type Error = LedgerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

/// Economic event kinds handled by the processor
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionKind {
    Gift,
    Fee,
    Reward,
    Payout,
    Adjustment,
}

/// Lifecycle status of a transaction record
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    Rejected,
}

/// One settlement attempt
///
/// Records are never revised. Corrections are new transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    /// Debited party (None for system-funded rewards)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AccountId>,
    /// Credited party (None for pure debits such as fees)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<AccountId>,
    pub amount: Coins,
    /// Platform cut
    #[serde(default)]
    pub fee_amount: Coins,
    /// Rejection reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Rejected => "rejected",
        }
    }
}

impl TransactionRecord {
    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }
}

/// Result of a committed settlement, replayed verbatim for duplicates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub record: TransactionRecord,
    /// Post-settlement balances of every touched account
    pub balances: BTreeMap<AccountId, Balances>,
}

impl SettlementReceipt {
    pub fn transaction_id(&self) -> &TransactionId {
        &self.record.transaction_id
    }

    /// Balances of one touched account
    pub fn balances_of(&self, account: &AccountId) -> Option<&Balances> {
        self.balances.get(account)
    }
}
