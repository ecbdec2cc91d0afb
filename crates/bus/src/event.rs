//! Settlement events for pub/sub distribution

use chrono::{DateTime, Utc};
use coinledger_core::{AccountId, Balances};
use coinledger_ledger::{SettlementReceipt, TransactionRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Events emitted by the settlement core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    /// A transaction committed and balances changed
    Committed {
        record: TransactionRecord,
        balances: BTreeMap<AccountId, Balances>,
        timestamp: DateTime<Utc>,
    },

    /// A transaction was rejected; balances are unchanged
    Rejected {
        record: TransactionRecord,
        timestamp: DateTime<Utc>,
    },

    /// An account was frozen or unfrozen
    FreezeChanged {
        account: AccountId,
        frozen: bool,
        reason: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl SettlementEvent {
    /// Create a Committed event from a receipt
    pub fn committed(receipt: &SettlementReceipt) -> Self {
        Self::Committed {
            record: receipt.record.clone(),
            balances: receipt.balances.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Create a Rejected event
    pub fn rejected(record: TransactionRecord) -> Self {
        Self::Rejected {
            record,
            timestamp: Utc::now(),
        }
    }

    /// Create a FreezeChanged event
    pub fn freeze_changed(account: AccountId, frozen: bool, reason: Option<String>) -> Self {
        Self::FreezeChanged {
            account,
            frozen,
            reason,
            timestamp: Utc::now(),
        }
    }
}
