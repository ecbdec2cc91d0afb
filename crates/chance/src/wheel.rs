//! The prize wheel
//!
//! A spin is one reward transaction keyed by the caller's draw id: the cost
//! is staked from free coins, the prize is credited, and a bankrupt result
//! forfeits the rest of the free balance in the same step. Replaying a draw
//! id returns the stored prize instead of rolling again; a duplicate that
//! arrives while the first spin is in flight waits for its receipt.

use chrono::{DateTime, Utc};
use coinledger_core::{AccountId, CoinClass};
use coinledger_grants::{Grant, GrantKind, GrantStore, NewGrant};
use coinledger_ledger::{SettlementReceipt, IN_FLIGHT_WAIT};
use coinledger_settlement::{
    SettleInstruction, SettleOutcome, SettleRequest, SettlementError, TransactionProcessor,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{GameConfig, WheelConfig};
use crate::draw::draw;
use crate::error::{ChanceError, ChanceResult};
use crate::prize::{Prize, PrizeKind};
use crate::spins::{SpinLog, SpinRecord, SpinReservation};

const META_GAME: &str = "game_id";
const META_PRIZE: &str = "prize";
const META_INSURANCE: &str = "insurance_grant";
const META_MULTIPLIER: &str = "multiplier";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Result of one spin
#[derive(Debug, Clone, Serialize)]
pub struct SpinOutcome {
    pub draw_id: String,
    pub game_id: String,
    pub account: AccountId,
    pub prize: Prize,
    /// Coins credited after any multiplier
    pub coins_won: u64,
    /// Grant created by an insurance or multiplier prize
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<Grant>,
    /// A held insurance grant absorbed a bankrupt result
    pub insurance_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    pub settlement: SettlementReceipt,
}

/// A rolled prize and the settlement request it becomes
struct Roll {
    prize: Prize,
    insurance: Option<Grant>,
    request: SettleRequest,
}

pub struct Wheel {
    processor: Arc<TransactionProcessor>,
    grants: Arc<dyn GrantStore>,
    spins: Arc<dyn SpinLog>,
    config: WheelConfig,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl Wheel {
    pub fn new(
        processor: Arc<TransactionProcessor>,
        grants: Arc<dyn GrantStore>,
        spins: Arc<dyn SpinLog>,
        config: WheelConfig,
    ) -> Self {
        Self {
            processor,
            grants,
            spins,
            config,
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
        }
    }

    /// Replace the random source (seeded generators in tests)
    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = Mutex::new(Box::new(rng));
        self
    }

    pub fn config(&self) -> &WheelConfig {
        &self.config
    }

    /// Spins allowed for `account` on the UTC day of `now`
    pub async fn daily_limit(&self, account: &AccountId, now: DateTime<Utc>) -> ChanceResult<u32> {
        let officer = self
            .grants
            .active_for(account, GrantKind::OfficerAssignment, now)
            .await?;
        Ok(if officer.is_empty() {
            self.config.daily_spin_limit
        } else {
            self.config.officer_daily_spin_limit
        })
    }

    /// Spins recorded for `account` on the UTC day of `now`
    pub async fn spins_today(&self, account: &AccountId, now: DateTime<Utc>) -> ChanceResult<u32> {
        self.spins.count(account, now.date_naive()).await
    }

    /// Spin `game_id` for `account` under idempotency key `draw_id`
    pub async fn spin(
        &self,
        account: &AccountId,
        game_id: &str,
        draw_id: &str,
        now: DateTime<Utc>,
    ) -> ChanceResult<SpinOutcome> {
        if let Some(receipt) = self.processor.lookup(draw_id).await? {
            return replay(account, game_id, draw_id, receipt);
        }

        let game = self.config.game(game_id)?;
        let limit = self.daily_limit(account, now).await?;
        let spin = SpinRecord::pending(draw_id, account, game_id, now);
        let deadline = Instant::now() + IN_FLIGHT_WAIT;

        loop {
            match self.spins.reserve(&spin, limit, self.config.spin_lease()).await? {
                SpinReservation::New => return self.run(account, game_id, game, draw_id, now).await,
                SpinReservation::LimitReached => {
                    debug!(account = %account, limit, "daily spin limit reached");
                    return Err(ChanceError::SpinLimitReached {
                        account: account.clone(),
                        limit,
                    });
                }
                SpinReservation::Taken(other) => {
                    if !other.same_spin(&spin) {
                        return Err(ChanceError::DrawMismatch(draw_id.to_string()));
                    }
                    if let Some(receipt) = self.processor.lookup(draw_id).await? {
                        return replay(account, game_id, draw_id, receipt);
                    }
                    if Instant::now() >= deadline {
                        return Err(ChanceError::InFlight(draw_id.to_string()));
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Settle a reserved spin; the reservation is released on failure
    async fn run(
        &self,
        account: &AccountId,
        game_id: &str,
        game: &GameConfig,
        draw_id: &str,
        now: DateTime<Utc>,
    ) -> ChanceResult<SpinOutcome> {
        let roll = match self.roll(account, game_id, game, draw_id, now).await {
            Ok(roll) => roll,
            Err(err) => return Err(self.abandon(draw_id, err).await),
        };

        let receipt = match self.processor.settle_outcome(&roll.request).await {
            Ok(SettleOutcome::Committed(receipt)) => receipt,
            // Settled under a lease that has since been taken over
            Ok(SettleOutcome::Replayed(receipt)) => {
                self.settled(draw_id).await;
                return replay(account, game_id, draw_id, receipt);
            }
            Err(SettlementError::IdempotencyMismatch(id)) => {
                match self.processor.lookup(draw_id).await? {
                    Some(receipt) => {
                        self.settled(draw_id).await;
                        return replay(account, game_id, draw_id, receipt);
                    }
                    None => {
                        let err = SettlementError::IdempotencyMismatch(id).into();
                        return Err(self.abandon(draw_id, err).await);
                    }
                }
            }
            Err(err) => return Err(self.abandon(draw_id, err.into()).await),
        };
        self.settled(draw_id).await;

        info!(
            draw_id,
            account = %account,
            game = game_id,
            prize = %roll.prize.id,
            coins = receipt.record.amount.value(),
            "wheel spin settled"
        );
        self.finish(account, game_id, draw_id, roll, receipt, now).await
    }

    async fn abandon(&self, draw_id: &str, err: ChanceError) -> ChanceError {
        if let Err(e) = self.spins.release(draw_id).await {
            warn!(draw_id, error = %e, "failed to release spin");
        }
        err
    }

    async fn settled(&self, draw_id: &str) {
        // The receipt is already committed; a pending row only delays takeover
        if let Err(e) = self.spins.mark_settled(draw_id).await {
            warn!(draw_id, error = %e, "failed to mark spin settled");
        }
    }

    async fn roll(
        &self,
        account: &AccountId,
        game_id: &str,
        game: &GameConfig,
        draw_id: &str,
        now: DateTime<Utc>,
    ) -> ChanceResult<Roll> {
        let prize = {
            let mut rng = self.rng.lock().await;
            draw(game.prizes.prizes(), &mut *rng)?.clone()
        };

        let insurance = if prize.kind == PrizeKind::Bankrupt {
            self.grants
                .active_for(account, GrantKind::Insurance, now)
                .await?
                .into_iter()
                .next()
        } else {
            None
        };

        let multiplier = if prize.kind == PrizeKind::Coins {
            self.grants
                .active_for(account, GrantKind::Multiplier, now)
                .await?
                .iter()
                .filter_map(|g| g.metadata.get("factor").and_then(|v| v.as_u64()))
                .max()
                .unwrap_or(1)
        } else {
            1
        };
        let coins_won = prize.coins().saturating_mul(multiplier);

        let mut request = SettleRequest::new(
            draw_id,
            SettleInstruction::Reward {
                recipient: account.clone(),
                amount: to_i64(coins_won, "prize")?,
                class: None,
                stake: Some(to_i64(game.cost, "spin cost")?),
                forfeit: (prize.kind == PrizeKind::Bankrupt && insurance.is_none())
                    .then_some(CoinClass::Free),
            },
        )
        .with_metadata(META_GAME, game_id)
        .with_metadata(META_PRIZE, serde_json::to_value(&prize)?);
        if let Some(ref grant) = insurance {
            request = request.with_metadata(META_INSURANCE, grant.id.as_str());
        }
        if multiplier > 1 {
            request = request.with_metadata(META_MULTIPLIER, multiplier);
        }

        Ok(Roll {
            prize,
            insurance,
            request,
        })
    }

    async fn finish(
        &self,
        account: &AccountId,
        game_id: &str,
        draw_id: &str,
        roll: Roll,
        receipt: SettlementReceipt,
        now: DateTime<Utc>,
    ) -> ChanceResult<SpinOutcome> {
        let Roll {
            prize, insurance, ..
        } = roll;

        if let Some(ref grant) = insurance {
            if self.grants.consume(&grant.id, now).await? {
                info!(account = %account, grant = %grant.id, "insurance absorbed bankrupt");
            } else {
                warn!(account = %account, grant = %grant.id, "insurance was already used");
            }
        }

        let grant = match prize.kind {
            PrizeKind::Insurance => Some(
                self.grants
                    .create(
                        NewGrant::new(
                            GrantKind::Insurance,
                            account.clone(),
                            now,
                            now + self.config.insurance_duration(),
                        )
                        .with_metadata("draw_id", draw_id),
                    )
                    .await?,
            ),
            PrizeKind::Multiplier => Some(
                self.grants
                    .create(
                        NewGrant::new(
                            GrantKind::Multiplier,
                            account.clone(),
                            now,
                            now + self.config.multiplier_duration(),
                        )
                        .with_metadata("draw_id", draw_id)
                        .with_metadata("factor", prize.value.max(1)),
                    )
                    .await?,
            ),
            _ => None,
        };

        Ok(SpinOutcome {
            draw_id: draw_id.to_string(),
            game_id: game_id.to_string(),
            account: account.clone(),
            coins_won: receipt.record.amount.value(),
            grant,
            insurance_used: insurance.is_some(),
            badge: badge(&prize),
            prize,
            settlement: receipt,
        })
    }
}

fn badge(prize: &Prize) -> Option<String> {
    (prize.kind == PrizeKind::Jackpot).then(|| prize.id.clone())
}

fn to_i64(value: u64, what: &str) -> ChanceResult<i64> {
    i64::try_from(value)
        .map_err(|_| SettlementError::InvalidAmount(format!("{what} {value} out of range")).into())
}

/// Rebuild the outcome of a committed draw from its receipt
fn replay(
    account: &AccountId,
    game_id: &str,
    draw_id: &str,
    receipt: SettlementReceipt,
) -> ChanceResult<SpinOutcome> {
    let metadata = &receipt.record.metadata;
    let same_spin = receipt.record.destination.as_ref() == Some(account)
        && metadata.get(META_GAME).and_then(|v| v.as_str()) == Some(game_id);
    let prize = match metadata.get(META_PRIZE) {
        Some(value) if same_spin => serde_json::from_value::<Prize>(value.clone())?,
        _ => return Err(ChanceError::DrawMismatch(draw_id.to_string())),
    };
    debug!(draw_id, account = %account, "wheel spin replayed");

    Ok(SpinOutcome {
        draw_id: draw_id.to_string(),
        game_id: game_id.to_string(),
        account: account.clone(),
        coins_won: receipt.record.amount.value(),
        grant: None,
        insurance_used: metadata.contains_key(META_INSURANCE),
        badge: badge(&prize),
        prize,
        settlement: receipt,
    })
}
