//! Spin log - one row per draw id
//!
//! A row is written before the prize is rolled. Its presence is what counts
//! against the daily limit and what makes a draw id single-owner: of any
//! number of concurrent spins with one id, exactly one reserves it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use coinledger_core::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};
use tokio::sync::Mutex;

use crate::error::ChanceResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SpinStatus {
    /// Reserved, settlement not confirmed yet
    Pending,
    Settled,
}

impl SpinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpinStatus::Pending => "pending",
            SpinStatus::Settled => "settled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinRecord {
    pub draw_id: String,
    pub account: AccountId,
    pub game_id: String,
    /// UTC day the spin counts against
    pub day: NaiveDate,
    pub status: SpinStatus,
    pub reserved_at: DateTime<Utc>,
}

impl SpinRecord {
    pub fn pending(draw_id: &str, account: &AccountId, game_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            draw_id: draw_id.to_string(),
            account: account.clone(),
            game_id: game_id.to_string(),
            day: now.date_naive(),
            status: SpinStatus::Pending,
            reserved_at: now,
        }
    }

    /// Same account and game as `other`
    pub fn same_spin(&self, other: &SpinRecord) -> bool {
        self.account == other.account && self.game_id == other.game_id
    }
}

/// Outcome of `SpinLog::reserve`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpinReservation {
    /// The caller owns the draw id and must settle or release it
    New,
    /// The draw id is held or settled by another call
    Taken(SpinRecord),
    /// The account has used up its spins for the day
    LimitReached,
}

/// Durable spin log
#[async_trait]
pub trait SpinLog: Send + Sync {
    /// Reserve `spin.draw_id`, counting it against `limit` spins on
    /// `spin.day`. A pending row older than `lease` with the same account
    /// and game is taken over rather than reported as taken.
    async fn reserve(
        &self,
        spin: &SpinRecord,
        limit: u32,
        lease: Duration,
    ) -> ChanceResult<SpinReservation>;

    /// Mark a reserved spin as settled
    async fn mark_settled(&self, draw_id: &str) -> ChanceResult<()>;

    /// Drop a pending spin that did not settle, so it does not count
    async fn release(&self, draw_id: &str) -> ChanceResult<()>;

    async fn get(&self, draw_id: &str) -> ChanceResult<Option<SpinRecord>>;

    /// Spins of `account` on `day`, pending or settled
    async fn count(&self, account: &AccountId, day: NaiveDate) -> ChanceResult<u32>;
}

/// In-memory spin log (tests, single-process deployments)
#[derive(Default)]
pub struct MemorySpinLog {
    spins: Mutex<HashMap<String, SpinRecord>>,
}

impl MemorySpinLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpinLog for MemorySpinLog {
    async fn reserve(
        &self,
        spin: &SpinRecord,
        limit: u32,
        lease: Duration,
    ) -> ChanceResult<SpinReservation> {
        let mut spins = self.spins.lock().await;

        if let Some(existing) = spins.get_mut(&spin.draw_id) {
            let stale = existing.status == SpinStatus::Pending
                && existing.reserved_at < spin.reserved_at - lease;
            if stale && existing.same_spin(spin) {
                existing.reserved_at = spin.reserved_at;
                return Ok(SpinReservation::New);
            }
            return Ok(SpinReservation::Taken(existing.clone()));
        }

        let used = spins
            .values()
            .filter(|s| s.account == spin.account && s.day == spin.day)
            .count();
        if used >= limit as usize {
            return Ok(SpinReservation::LimitReached);
        }
        spins.insert(spin.draw_id.clone(), spin.clone());
        Ok(SpinReservation::New)
    }

    async fn mark_settled(&self, draw_id: &str) -> ChanceResult<()> {
        if let Some(spin) = self.spins.lock().await.get_mut(draw_id) {
            spin.status = SpinStatus::Settled;
        }
        Ok(())
    }

    async fn release(&self, draw_id: &str) -> ChanceResult<()> {
        let mut spins = self.spins.lock().await;
        if spins
            .get(draw_id)
            .is_some_and(|s| s.status == SpinStatus::Pending)
        {
            spins.remove(draw_id);
        }
        Ok(())
    }

    async fn get(&self, draw_id: &str) -> ChanceResult<Option<SpinRecord>> {
        Ok(self.spins.lock().await.get(draw_id).cloned())
    }

    async fn count(&self, account: &AccountId, day: NaiveDate) -> ChanceResult<u32> {
        let spins = self.spins.lock().await;
        let count = spins
            .values()
            .filter(|s| &s.account == account && s.day == day)
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> AccountId {
        AccountId::new("alice").unwrap()
    }

    #[tokio::test]
    async fn test_limit_counts_pending_and_settled() {
        let log = MemorySpinLog::new();
        let now = Utc::now();
        let lease = Duration::seconds(60);

        let first = SpinRecord::pending("d-1", &alice(), "wheel", now);
        assert_eq!(log.reserve(&first, 2, lease).await.unwrap(), SpinReservation::New);
        log.mark_settled("d-1").await.unwrap();
        let second = SpinRecord::pending("d-2", &alice(), "wheel", now);
        assert_eq!(log.reserve(&second, 2, lease).await.unwrap(), SpinReservation::New);

        let third = SpinRecord::pending("d-3", &alice(), "wheel", now);
        assert_eq!(
            log.reserve(&third, 2, lease).await.unwrap(),
            SpinReservation::LimitReached
        );

        // A released spin frees its slot
        log.release("d-2").await.unwrap();
        assert_eq!(log.reserve(&third, 2, lease).await.unwrap(), SpinReservation::New);
        assert_eq!(log.count(&alice(), now.date_naive()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_is_taken_until_lease_expires() {
        let log = MemorySpinLog::new();
        let now = Utc::now();
        let lease = Duration::seconds(60);
        let spin = SpinRecord::pending("d-1", &alice(), "wheel", now);
        log.reserve(&spin, 10, lease).await.unwrap();

        assert!(matches!(
            log.reserve(&spin, 10, lease).await.unwrap(),
            SpinReservation::Taken(ref s) if s.status == SpinStatus::Pending
        ));

        let later = SpinRecord::pending("d-1", &alice(), "wheel", now + Duration::seconds(61));
        assert_eq!(log.reserve(&later, 10, lease).await.unwrap(), SpinReservation::New);
        assert_eq!(log.count(&alice(), now.date_naive()).await.unwrap(), 1);

        // Settled spins are never taken over
        log.mark_settled("d-1").await.unwrap();
        let much_later = SpinRecord::pending("d-1", &alice(), "wheel", now + Duration::hours(1));
        assert!(matches!(
            log.reserve(&much_later, 10, lease).await.unwrap(),
            SpinReservation::Taken(_)
        ));
    }
}
