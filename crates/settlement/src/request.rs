//! Settlement request and response contract

use coinledger_core::{AccountId, Balances, CoinClass};
use coinledger_ledger::{SettlementReceipt, TransactionKind, TransactionRecord, TransactionStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::SettlementResult;

/// What to settle. Amounts are signed on the wire so that zero and negative
/// inputs reach validation and are rejected as `InvalidAmount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SettleInstruction {
    /// Sender pays `amount`; receiver gets it minus the platform commission
    Gift {
        sender: AccountId,
        receiver: AccountId,
        amount: i64,
    },

    /// Fixed fee from the fee schedule, charged from purchased coins
    Fee {
        payer: AccountId,
        code: String,
        /// Officer credited a commission on the fee
        #[serde(default, skip_serializing_if = "Option::is_none")]
        beneficiary: Option<AccountId>,
    },

    /// System-funded credit, optionally paid for with a free-coin stake
    Reward {
        recipient: AccountId,
        amount: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        class: Option<CoinClass>,
        /// Free coins debited in the same step (chance game cost)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stake: Option<i64>,
        /// Class whose remaining balance is forfeited in the same step
        #[serde(default, skip_serializing_if = "Option::is_none")]
        forfeit: Option<CoinClass>,
    },

    /// Cashout, bounded by the payout policy
    Payout { account: AccountId, amount: i64 },

    /// Administrative signed correction of one class
    Adjustment {
        account: AccountId,
        class: CoinClass,
        amount: i64,
    },
}

impl SettleInstruction {
    pub fn kind(&self) -> TransactionKind {
        match self {
            SettleInstruction::Gift { .. } => TransactionKind::Gift,
            SettleInstruction::Fee { .. } => TransactionKind::Fee,
            SettleInstruction::Reward { .. } => TransactionKind::Reward,
            SettleInstruction::Payout { .. } => TransactionKind::Payout,
            SettleInstruction::Adjustment { .. } => TransactionKind::Adjustment,
        }
    }

    /// Every account the instruction touches
    pub fn accounts(&self) -> Vec<&AccountId> {
        match self {
            SettleInstruction::Gift {
                sender, receiver, ..
            } => vec![sender, receiver],
            SettleInstruction::Fee {
                payer, beneficiary, ..
            } => std::iter::once(payer).chain(beneficiary.as_ref()).collect(),
            SettleInstruction::Reward { recipient, .. } => vec![recipient],
            SettleInstruction::Payout { account, .. } => vec![account],
            SettleInstruction::Adjustment { account, .. } => vec![account],
        }
    }

    /// Accounts that lose coins and must pass the risk gate
    pub fn debited_accounts(&self) -> Vec<&AccountId> {
        match self {
            SettleInstruction::Gift { sender, .. } => vec![sender],
            SettleInstruction::Fee { payer, .. } => vec![payer],
            SettleInstruction::Reward {
                recipient,
                stake,
                forfeit,
                ..
            } => {
                if stake.is_some_and(|s| s != 0) || forfeit.is_some() {
                    vec![recipient]
                } else {
                    Vec::new()
                }
            }
            SettleInstruction::Payout { account, .. } => vec![account],
            SettleInstruction::Adjustment { account, amount, .. } => {
                if *amount < 0 {
                    vec![account]
                } else {
                    Vec::new()
                }
            }
        }
    }
}

/// One settle call: `{transaction_id, kind, <accounts>, amount|code, metadata}`
///
/// # Example
/// ```
/// use coinledger_settlement::{SettleInstruction, SettleRequest};
///
/// let request: SettleRequest = serde_json::from_str(
///     r#"{"transaction_id": "fee-1", "kind": "fee", "payer": "alice", "code": "kick"}"#,
/// )
/// .unwrap();
/// assert!(matches!(request.instruction, SettleInstruction::Fee { .. }));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleRequest {
    pub transaction_id: String,
    #[serde(flatten)]
    pub instruction: SettleInstruction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl SettleRequest {
    pub fn new(transaction_id: impl Into<String>, instruction: SettleInstruction) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            instruction,
            metadata: BTreeMap::new(),
        }
    }

    pub fn gift(id: impl Into<String>, sender: AccountId, receiver: AccountId, amount: i64) -> Self {
        Self::new(
            id,
            SettleInstruction::Gift {
                sender,
                receiver,
                amount,
            },
        )
    }

    pub fn fee(id: impl Into<String>, payer: AccountId, code: impl Into<String>) -> Self {
        Self::new(
            id,
            SettleInstruction::Fee {
                payer,
                code: code.into(),
                beneficiary: None,
            },
        )
    }

    pub fn reward(id: impl Into<String>, recipient: AccountId, amount: i64) -> Self {
        Self::new(
            id,
            SettleInstruction::Reward {
                recipient,
                amount,
                class: None,
                stake: None,
                forfeit: None,
            },
        )
    }

    pub fn payout(id: impl Into<String>, account: AccountId, amount: i64) -> Self {
        Self::new(id, SettleInstruction::Payout { account, amount })
    }

    pub fn adjustment(
        id: impl Into<String>,
        account: AccountId,
        class: CoinClass,
        amount: i64,
    ) -> Self {
        Self::new(
            id,
            SettleInstruction::Adjustment {
                account,
                class,
                amount,
            },
        )
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Caller-facing result: `{status, reason?, balances?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettleResponse {
    pub transaction_id: String,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balances: Option<BTreeMap<AccountId, Balances>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionRecord>,
}

impl SettleResponse {
    pub fn from_result(transaction_id: &str, result: &SettlementResult<SettlementReceipt>) -> Self {
        match result {
            Ok(receipt) => Self {
                transaction_id: transaction_id.to_string(),
                status: TransactionStatus::Committed,
                reason: None,
                message: None,
                balances: Some(receipt.balances.clone()),
                transaction: Some(receipt.record.clone()),
            },
            Err(err) => Self {
                transaction_id: transaction_id.to_string(),
                status: TransactionStatus::Rejected,
                reason: Some(err.code().to_string()),
                message: Some(err.to_string()),
                balances: None,
                transaction: None,
            },
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == TransactionStatus::Committed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SettlementError;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    #[test]
    fn test_parse_gift_request() {
        let request: SettleRequest = serde_json::from_str(
            r#"{
                "transaction_id": "gift-42",
                "kind": "gift",
                "sender": "alice",
                "receiver": "bob",
                "amount": 100,
                "metadata": {"stream": "s-1"}
            }"#,
        )
        .unwrap();

        assert_eq!(request.instruction.kind(), TransactionKind::Gift);
        assert_eq!(request.instruction.accounts().len(), 2);
        assert_eq!(request.instruction.debited_accounts(), vec![&id("alice")]);
        assert_eq!(request.metadata["stream"], "s-1");
    }

    #[test]
    fn test_negative_amount_survives_parsing() {
        let request: SettleRequest = serde_json::from_str(
            r#"{"transaction_id": "p-1", "kind": "payout", "account": "bob", "amount": -5}"#,
        )
        .unwrap();
        assert!(matches!(
            request.instruction,
            SettleInstruction::Payout { amount: -5, .. }
        ));
    }

    #[test]
    fn test_debited_accounts() {
        let credit = SettleRequest::adjustment("a-1", id("bob"), CoinClass::Free, 10);
        assert!(credit.instruction.debited_accounts().is_empty());

        let debit = SettleRequest::adjustment("a-2", id("bob"), CoinClass::Free, -10);
        assert_eq!(debit.instruction.debited_accounts(), vec![&id("bob")]);

        let reward = SettleRequest::reward("r-1", id("carol"), 50);
        assert!(reward.instruction.debited_accounts().is_empty());

        let fee = SettleRequest::new(
            "f-1",
            SettleInstruction::Fee {
                payer: id("alice"),
                code: "kick".into(),
                beneficiary: Some(id("officer")),
            },
        );
        assert_eq!(fee.instruction.accounts().len(), 2);
        assert_eq!(fee.instruction.debited_accounts(), vec![&id("alice")]);
    }

    #[test]
    fn test_rejected_response() {
        let result: SettlementResult<SettlementReceipt> =
            Err(SettlementError::UnknownFee("teleport".into()));
        let response = SettleResponse::from_result("fee-9", &result);
        assert_eq!(response.status, TransactionStatus::Rejected);
        assert_eq!(response.reason.as_deref(), Some("unknown_fee"));
        assert!(response.balances.is_none());

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"rejected\""));
    }
}
