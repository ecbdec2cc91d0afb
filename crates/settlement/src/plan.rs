//! Amount computation
//!
//! Pure: turns an instruction plus a balance snapshot into per-account
//! deltas. The store re-checks every delta atomically, so a stale snapshot
//! can only cause a retry, never an overdraft.

use coinledger_core::{AccountId, BalanceDelta, Balances, CoinClass, Coins};
use coinledger_ledger::TransactionKind;
use coinledger_store::{merge_deltas, AccountDelta, StoreError};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::SettlementConfig;
use crate::error::{SettlementError, SettlementResult};
use crate::request::SettleInstruction;

/// Computed effect of one instruction
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Plan {
    pub kind: TransactionKind,
    pub source: Option<AccountId>,
    pub destination: Option<AccountId>,
    pub amount: Coins,
    pub fee_amount: Coins,
    pub deltas: Vec<AccountDelta>,
    pub metadata: BTreeMap<String, Value>,
}

impl Plan {
    fn new(kind: TransactionKind, amount: Coins) -> Self {
        Self {
            kind,
            source: None,
            destination: None,
            amount,
            fee_amount: Coins::ZERO,
            deltas: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }
}

pub(crate) fn plan(
    instruction: &SettleInstruction,
    config: &SettlementConfig,
    snapshot: &BTreeMap<AccountId, Balances>,
) -> SettlementResult<Plan> {
    let plan = match instruction {
        SettleInstruction::Gift {
            sender,
            receiver,
            amount,
        } => {
            if sender == receiver {
                return Err(SettlementError::SelfTransfer(sender.clone()));
            }
            let amount = positive(*amount, "gift amount")?;
            let commission = share(amount, config.gift_commission_rate)?;
            let credited = amount.saturating_sub(commission);

            let debit = draw_down(
                sender,
                balances(snapshot, sender),
                &config.gift_funding_order,
                amount,
            )?
            .record_spent(amount);
            let credit = BalanceDelta::new()
                .credit(CoinClass::Earned, credited)
                .accrue_earned(credited);

            let mut plan = Plan::new(TransactionKind::Gift, amount);
            plan.source = Some(sender.clone());
            plan.destination = Some(receiver.clone());
            plan.fee_amount = commission;
            plan.deltas = vec![
                AccountDelta::new(sender.clone(), debit),
                AccountDelta::new(receiver.clone(), credit),
            ];
            plan
        }

        SettleInstruction::Fee {
            payer,
            code,
            beneficiary,
        } => {
            let fee = config
                .fees
                .lookup(code)
                .ok_or_else(|| SettlementError::UnknownFee(code.clone()))?;
            if beneficiary.as_ref() == Some(payer) {
                return Err(SettlementError::SelfTransfer(payer.clone()));
            }

            let mut plan = Plan::new(TransactionKind::Fee, fee);
            plan.source = Some(payer.clone());
            plan.deltas.push(AccountDelta::new(
                payer.clone(),
                BalanceDelta::new()
                    .debit(CoinClass::Purchased, fee)
                    .record_spent(fee),
            ));
            plan.metadata.insert("fee_code".to_string(), Value::from(code.as_str()));

            let commission = match beneficiary {
                Some(officer) => {
                    let commission = share(fee, config.officer_commission_rate)?;
                    plan.destination = Some(officer.clone());
                    if !commission.is_zero() {
                        plan.deltas.push(AccountDelta::new(
                            officer.clone(),
                            BalanceDelta::new()
                                .credit(CoinClass::Earned, commission)
                                .accrue_earned(commission),
                        ));
                    }
                    plan.metadata
                        .insert("commission".to_string(), Value::from(commission.value()));
                    commission
                }
                None => Coins::ZERO,
            };
            plan.fee_amount = fee.saturating_sub(commission);
            plan
        }

        SettleInstruction::Reward {
            recipient,
            amount,
            class,
            stake,
            forfeit,
        } => {
            let prize = non_negative(*amount, "reward amount")?;
            let stake = non_negative(stake.unwrap_or(0), "stake")?;
            if prize.is_zero() && stake.is_zero() && forfeit.is_none() {
                return Err(SettlementError::InvalidAmount(
                    "reward moves no coins".to_string(),
                ));
            }
            let class = class.unwrap_or(config.reward_class);

            let mut delta = BalanceDelta::new();
            if !stake.is_zero() {
                delta = delta.debit(CoinClass::Free, stake).record_spent(stake);
            }
            if !prize.is_zero() {
                delta = delta.credit(class, prize);
                if class == CoinClass::Earned {
                    delta = delta.accrue_earned(prize);
                }
            }

            let mut plan = Plan::new(TransactionKind::Reward, prize);
            let mut expected = None;
            if let Some(forfeit) = forfeit {
                // Whatever the class would hold after stake and prize
                let before = balances(snapshot, recipient).get(*forfeit);
                expected = Some((*forfeit, before));
                let remaining = i128::from(before.value()) + i128::from(delta.get(*forfeit));
                let forfeited = Coins::from(u64::try_from(remaining.max(0)).unwrap_or(u64::MAX));
                if !forfeited.is_zero() {
                    delta = delta.debit(*forfeit, forfeited);
                }
                plan.metadata
                    .insert("forfeited".to_string(), Value::from(forfeited.value()));
            }
            if !stake.is_zero() {
                plan.metadata.insert("stake".to_string(), Value::from(stake.value()));
            }

            plan.destination = Some(recipient.clone());
            let mut recipient_delta = AccountDelta::new(recipient.clone(), delta);
            if let Some((class, coins)) = expected {
                // The forfeit is sized from the snapshot; the store rejects it if the class moved
                recipient_delta = recipient_delta.expecting(class, coins);
            }
            plan.deltas.push(recipient_delta);
            plan
        }

        SettleInstruction::Payout { account, amount } => {
            let amount = positive(*amount, "payout amount")?;
            let processing_fee = share(amount, config.payout_processing_fee_rate)?;
            let debit = draw_down(
                account,
                balances(snapshot, account),
                config.payout_policy.classes(),
                amount,
            )?;

            let mut plan = Plan::new(TransactionKind::Payout, amount);
            plan.source = Some(account.clone());
            plan.fee_amount = processing_fee;
            plan.deltas.push(AccountDelta::new(account.clone(), debit));
            plan.metadata.insert(
                "net_payout".to_string(),
                Value::from(amount.saturating_sub(processing_fee).value()),
            );
            plan
        }

        SettleInstruction::Adjustment {
            account,
            class,
            amount,
        } => {
            if *amount == 0 {
                return Err(SettlementError::InvalidAmount(
                    "adjustment amount must not be zero".to_string(),
                ));
            }
            let magnitude = Coins::from(amount.unsigned_abs());
            let mut plan = Plan::new(TransactionKind::Adjustment, magnitude);
            let delta = if *amount > 0 {
                plan.destination = Some(account.clone());
                BalanceDelta::new().credit(*class, magnitude)
            } else {
                plan.source = Some(account.clone());
                BalanceDelta::new().debit(*class, magnitude)
            };
            plan.deltas.push(AccountDelta::new(account.clone(), delta));
            plan.metadata
                .insert("class".to_string(), Value::from(class.column()));
            plan
        }
    };

    check_snapshot(&plan, snapshot)?;
    Ok(plan)
}

/// Reject early when the snapshot already shows an overdraft
fn check_snapshot(plan: &Plan, snapshot: &BTreeMap<AccountId, Balances>) -> SettlementResult<()> {
    for (account, delta) in merge_deltas(&plan.deltas) {
        let current = balances(snapshot, &account);
        if let Err(err) = current.apply(&delta) {
            return Err(StoreError::from_balance(&account, err).into());
        }
    }
    Ok(())
}

/// Debit `amount` from `order`, exhausting each class before the next
fn draw_down(
    account: &AccountId,
    current: Balances,
    order: &[CoinClass],
    amount: Coins,
) -> SettlementResult<BalanceDelta> {
    let available = current.spendable(order);
    if available < amount {
        return Err(SettlementError::InsufficientFunds {
            account: account.clone(),
            available,
            requested: amount,
        });
    }

    let mut remaining = amount;
    let mut delta = BalanceDelta::new();
    let mut used = Vec::with_capacity(order.len());
    for class in order {
        if remaining.is_zero() {
            break;
        }
        if used.contains(class) {
            continue;
        }
        used.push(*class);
        let take = current.get(*class).min(remaining);
        if !take.is_zero() {
            delta = delta.debit(*class, take);
            remaining = remaining.saturating_sub(take);
        }
    }
    Ok(delta)
}

fn balances(snapshot: &BTreeMap<AccountId, Balances>, account: &AccountId) -> Balances {
    snapshot.get(account).copied().unwrap_or_default()
}

fn positive(amount: i64, what: &str) -> SettlementResult<Coins> {
    if amount <= 0 {
        return Err(SettlementError::InvalidAmount(format!(
            "{what} must be positive, got {amount}"
        )));
    }
    non_negative(amount, what)
}

fn non_negative(amount: i64, what: &str) -> SettlementResult<Coins> {
    Coins::new(amount)
        .map_err(|_| SettlementError::InvalidAmount(format!("{what} must not be negative, got {amount}")))
}

fn share(amount: Coins, rate: rust_decimal::Decimal) -> SettlementResult<Coins> {
    amount
        .share(rate)
        .map_err(|e| SettlementError::InvalidAmount(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PayoutPolicy;
    use rust_decimal_macros::dec;

    fn id(s: &str) -> AccountId {
        AccountId::new(s).unwrap()
    }

    fn snapshot(entries: &[(&str, Balances)]) -> BTreeMap<AccountId, Balances> {
        entries.iter().map(|(n, b)| (id(n), *b)).collect()
    }

    fn wallet(free: u64, purchased: u64, earned: u64) -> Balances {
        Balances::default()
            .with(CoinClass::Free, free)
            .with(CoinClass::Purchased, purchased)
            .with(CoinClass::Earned, earned)
    }

    fn delta_of<'a>(plan: &'a Plan, name: &str) -> &'a BalanceDelta {
        &plan
            .deltas
            .iter()
            .find(|d| d.account.as_str() == name)
            .unwrap()
            .delta
    }

    #[test]
    fn test_gift_draws_free_before_purchased() {
        let config = SettlementConfig::default();
        let snap = snapshot(&[("alice", wallet(30, 500, 1000))]);
        let gift = SettleInstruction::Gift {
            sender: id("alice"),
            receiver: id("bob"),
            amount: 105,
        };

        let plan = plan(&gift, &config, &snap).unwrap();
        let sender = delta_of(&plan, "alice");
        assert_eq!(sender.free, -30);
        assert_eq!(sender.purchased, -75);
        assert_eq!(sender.earned, 0);

        // floor(105 * 0.10) = 10 to the platform, 95 to the receiver
        assert_eq!(plan.fee_amount, Coins::from(10));
        let receiver = delta_of(&plan, "bob");
        assert_eq!(receiver.earned, 95);
        assert_eq!(receiver.earned_accrued, Coins::from(95));
    }

    #[test]
    fn test_gift_never_spends_earned_by_default() {
        let config = SettlementConfig::default();
        let snap = snapshot(&[("alice", wallet(0, 10, 1000))]);
        let gift = SettleInstruction::Gift {
            sender: id("alice"),
            receiver: id("bob"),
            amount: 50,
        };
        assert!(matches!(
            plan(&gift, &config, &snap),
            Err(SettlementError::InsufficientFunds { available, .. }) if available == Coins::from(10)
        ));
    }

    #[test]
    fn test_gift_to_self_rejected() {
        let gift = SettleInstruction::Gift {
            sender: id("alice"),
            receiver: id("alice"),
            amount: 5,
        };
        assert!(matches!(
            plan(&gift, &SettlementConfig::default(), &BTreeMap::new()),
            Err(SettlementError::SelfTransfer(_))
        ));
    }

    #[test]
    fn test_fee_with_officer_commission() {
        let config = SettlementConfig::default();
        let snap = snapshot(&[("alice", wallet(0, 2000, 0))]);
        let fee = SettleInstruction::Fee {
            payer: id("alice"),
            code: "kick".into(),
            beneficiary: Some(id("officer")),
        };

        let plan = plan(&fee, &config, &snap).unwrap();
        assert_eq!(plan.amount, Coins::from(500));
        assert_eq!(delta_of(&plan, "alice").purchased, -500);
        assert_eq!(delta_of(&plan, "officer").earned, 150);
        assert_eq!(plan.fee_amount, Coins::from(350));
    }

    #[test]
    fn test_fee_draws_purchased_only() {
        let config = SettlementConfig::default();
        let snap = snapshot(&[("alice", wallet(10_000, 300, 10_000))]);
        let fee = SettleInstruction::Fee {
            payer: id("alice"),
            code: "ban".into(),
            beneficiary: None,
        };
        assert!(matches!(
            plan(&fee, &config, &snap),
            Err(SettlementError::InsufficientFunds { requested, .. }) if requested == Coins::from(2000)
        ));
    }

    #[test]
    fn test_unknown_fee() {
        let fee = SettleInstruction::Fee {
            payer: id("alice"),
            code: "teleport".into(),
            beneficiary: None,
        };
        assert_eq!(
            plan(&fee, &SettlementConfig::default(), &BTreeMap::new()),
            Err(SettlementError::UnknownFee("teleport".into()))
        );
    }

    #[test]
    fn test_reward_with_stake_and_forfeit() {
        let config = SettlementConfig::default();
        let snap = snapshot(&[("alice", wallet(1200, 0, 0))]);
        let bankrupt = SettleInstruction::Reward {
            recipient: id("alice"),
            amount: 0,
            class: None,
            stake: Some(500),
            forfeit: Some(CoinClass::Free),
        };

        let plan = plan(&bankrupt, &config, &snap).unwrap();
        let delta = delta_of(&plan, "alice");
        // 500 stake plus the remaining 700
        assert_eq!(delta.free, -1200);
        assert_eq!(plan.metadata["forfeited"], 700);
        assert_eq!(wallet(1200, 0, 0).apply(delta).unwrap().free, Coins::ZERO);
        assert_eq!(
            plan.deltas[0].expected,
            Some((CoinClass::Free, Coins::from(1200)))
        );
    }

    #[test]
    fn test_reward_requires_movement() {
        let empty = SettleInstruction::Reward {
            recipient: id("alice"),
            amount: 0,
            class: None,
            stake: None,
            forfeit: None,
        };
        assert!(matches!(
            plan(&empty, &SettlementConfig::default(), &BTreeMap::new()),
            Err(SettlementError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_payout_policies() {
        let snap = snapshot(&[("bob", wallet(0, 400, 100))]);
        let payout = SettleInstruction::Payout {
            account: id("bob"),
            amount: 300,
        };

        let earned_only = SettlementConfig::default();
        assert!(matches!(
            plan(&payout, &earned_only, &snap),
            Err(SettlementError::InsufficientFunds { .. })
        ));

        let mut mixed = earned_only.with_payout_policy(PayoutPolicy::EarnedThenPurchased);
        mixed.payout_processing_fee_rate = dec!(0.05);
        let plan = plan(&payout, &mixed, &snap).unwrap();
        let delta = delta_of(&plan, "bob");
        assert_eq!(delta.earned, -100);
        assert_eq!(delta.purchased, -200);
        assert_eq!(plan.fee_amount, Coins::from(15));
        assert_eq!(plan.metadata["net_payout"], 285);
    }

    #[test]
    fn test_invalid_amounts() {
        let config = SettlementConfig::default();
        for amount in [0, -1] {
            let gift = SettleInstruction::Gift {
                sender: id("alice"),
                receiver: id("bob"),
                amount,
            };
            assert!(matches!(
                plan(&gift, &config, &BTreeMap::new()),
                Err(SettlementError::InvalidAmount(_))
            ));
        }
        let adjust = SettleInstruction::Adjustment {
            account: id("alice"),
            class: CoinClass::Free,
            amount: 0,
        };
        assert!(matches!(
            plan(&adjust, &config, &BTreeMap::new()),
            Err(SettlementError::InvalidAmount(_))
        ));
    }
}
