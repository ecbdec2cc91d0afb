//! Idempotency ledger - at-most-once commit per transaction id

use crate::error::{LedgerError, LedgerResult};
use crate::transaction::{SettlementReceipt, TransactionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// How long a duplicate waits for the in-flight attempt before `InFlight`
pub const IN_FLIGHT_WAIT: Duration = Duration::from_secs(5);

/// Outcome of `begin_or_get`
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// First sighting - the caller now holds the reservation and must
    /// either `commit` or `release` it
    New,
    /// Already committed - the stored receipt, no side effect may run
    Replay(SettlementReceipt),
}

/// Append-only record of processed transaction ids
///
/// Implementations must make `begin_or_get` atomic per id: of any number of
/// concurrent callers with the same id, exactly one observes `New`.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Reserve `id` or return its committed receipt.
    ///
    /// `fingerprint` identifies the payload; reusing an id with a different
    /// payload fails with `FingerprintMismatch`. If another caller holds the
    /// reservation, waits for it to commit or release.
    async fn begin_or_get(
        &self,
        id: &TransactionId,
        fingerprint: &str,
    ) -> LedgerResult<Reservation>;

    /// Record the committed receipt against a reserved id
    async fn commit(&self, id: &TransactionId, receipt: &SettlementReceipt) -> LedgerResult<()>;

    /// Drop a reservation so a corrected retry can reuse the id
    async fn release(&self, id: &TransactionId) -> LedgerResult<()>;

    /// Committed receipt for an id, if any
    async fn lookup(&self, id: &TransactionId) -> LedgerResult<Option<SettlementReceipt>>;
}

enum Slot {
    Reserved {
        fingerprint: String,
        // Dropped on commit/release, which wakes every waiter
        done: watch::Sender<()>,
    },
    Committed {
        fingerprint: String,
        receipt: SettlementReceipt,
    },
}

/// In-memory idempotency ledger (tests, single-process deployments)
pub struct MemoryIdempotencyLedger {
    slots: Mutex<HashMap<TransactionId, Slot>>,
    wait_timeout: Duration,
}

impl MemoryIdempotencyLedger {
    pub const DEFAULT_WAIT: Duration = IN_FLIGHT_WAIT;

    pub fn new() -> Self {
        Self::with_wait_timeout(Self::DEFAULT_WAIT)
    }

    pub fn with_wait_timeout(wait_timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            wait_timeout,
        }
    }

    /// Number of committed ids
    pub async fn committed_count(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| matches!(slot, Slot::Committed { .. }))
            .count()
    }
}

impl Default for MemoryIdempotencyLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyLedger for MemoryIdempotencyLedger {
    async fn begin_or_get(
        &self,
        id: &TransactionId,
        fingerprint: &str,
    ) -> LedgerResult<Reservation> {
        loop {
            let mut waiter = {
                let mut slots = self.slots.lock().await;
                match slots.get(id) {
                    None => {
                        let (done, _) = watch::channel(());
                        slots.insert(
                            id.clone(),
                            Slot::Reserved {
                                fingerprint: fingerprint.to_string(),
                                done,
                            },
                        );
                        return Ok(Reservation::New);
                    }
                    Some(Slot::Committed {
                        fingerprint: stored,
                        receipt,
                    }) => {
                        if stored != fingerprint {
                            return Err(LedgerError::FingerprintMismatch(id.to_string()));
                        }
                        return Ok(Reservation::Replay(receipt.clone()));
                    }
                    Some(Slot::Reserved {
                        fingerprint: stored,
                        done,
                    }) => {
                        if stored != fingerprint {
                            return Err(LedgerError::FingerprintMismatch(id.to_string()));
                        }
                        done.subscribe()
                    }
                }
            };

            debug!(transaction_id = %id, "waiting for in-flight attempt");
            // Err means the sender was dropped: the holder committed or released
            if tokio::time::timeout(self.wait_timeout, waiter.changed())
                .await
                .is_err()
            {
                return Err(LedgerError::InFlight(id.to_string()));
            }
        }
    }

    async fn commit(&self, id: &TransactionId, receipt: &SettlementReceipt) -> LedgerResult<()> {
        let mut slots = self.slots.lock().await;
        let fingerprint = match slots.get(id) {
            Some(Slot::Reserved { fingerprint, .. }) => fingerprint.clone(),
            _ => return Err(LedgerError::NotReserved(id.to_string())),
        };
        slots.insert(
            id.clone(),
            Slot::Committed {
                fingerprint,
                receipt: receipt.clone(),
            },
        );
        Ok(())
    }

    async fn release(&self, id: &TransactionId) -> LedgerResult<()> {
        let mut slots = self.slots.lock().await;
        if matches!(slots.get(id), Some(Slot::Reserved { .. })) {
            slots.remove(id);
        }
        Ok(())
    }

    async fn lookup(&self, id: &TransactionId) -> LedgerResult<Option<SettlementReceipt>> {
        let slots = self.slots.lock().await;
        Ok(match slots.get(id) {
            Some(Slot::Committed { receipt, .. }) => Some(receipt.clone()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TransactionKind, TransactionRecord, TransactionStatus};
    use chrono::Utc;
    use coinledger_core::Coins;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn receipt(id: &TransactionId) -> SettlementReceipt {
        SettlementReceipt {
            record: TransactionRecord {
                transaction_id: id.clone(),
                kind: TransactionKind::Reward,
                status: TransactionStatus::Committed,
                source: None,
                destination: None,
                amount: Coins::from(10),
                fee_amount: Coins::ZERO,
                reason: None,
                metadata: BTreeMap::new(),
                created_at: Utc::now(),
            },
            balances: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_begin_commit_replay() {
        let ledger = MemoryIdempotencyLedger::new();
        let id = TransactionId::parse("tx-1").unwrap();

        assert_eq!(ledger.begin_or_get(&id, "fp").await.unwrap(), Reservation::New);
        let r = receipt(&id);
        ledger.commit(&id, &r).await.unwrap();

        assert_eq!(
            ledger.begin_or_get(&id, "fp").await.unwrap(),
            Reservation::Replay(r.clone())
        );
        assert_eq!(ledger.lookup(&id).await.unwrap(), Some(r));
        assert_eq!(ledger.committed_count().await, 1);
    }

    #[tokio::test]
    async fn test_release_allows_retry() {
        let ledger = MemoryIdempotencyLedger::new();
        let id = TransactionId::parse("tx-2").unwrap();

        ledger.begin_or_get(&id, "fp").await.unwrap();
        ledger.release(&id).await.unwrap();
        assert_eq!(ledger.begin_or_get(&id, "fp").await.unwrap(), Reservation::New);
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch() {
        let ledger = MemoryIdempotencyLedger::new();
        let id = TransactionId::parse("tx-3").unwrap();

        ledger.begin_or_get(&id, "a").await.unwrap();
        ledger.commit(&id, &receipt(&id)).await.unwrap();
        assert_eq!(
            ledger.begin_or_get(&id, "b").await,
            Err(LedgerError::FingerprintMismatch("tx-3".to_string()))
        );
    }

    #[tokio::test]
    async fn test_commit_without_reservation_fails() {
        let ledger = MemoryIdempotencyLedger::new();
        let id = TransactionId::parse("tx-4").unwrap();
        assert!(matches!(
            ledger.commit(&id, &receipt(&id)).await,
            Err(LedgerError::NotReserved(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waiter_sees_commit() {
        let ledger = Arc::new(MemoryIdempotencyLedger::new());
        let id = TransactionId::parse("tx-5").unwrap();
        ledger.begin_or_get(&id, "fp").await.unwrap();

        let waiter = {
            let ledger = ledger.clone();
            let id = id.clone();
            tokio::spawn(async move { ledger.begin_or_get(&id, "fp").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let r = receipt(&id);
        ledger.commit(&id, &r).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap(), Reservation::Replay(r));
    }

    #[test]
    fn test_default_wait_is_shared() {
        assert_eq!(MemoryIdempotencyLedger::DEFAULT_WAIT, IN_FLIGHT_WAIT);
        assert_eq!(IN_FLIGHT_WAIT, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_waiter_times_out() {
        let ledger = MemoryIdempotencyLedger::with_wait_timeout(Duration::from_millis(10));
        let id = TransactionId::parse("tx-6").unwrap();
        ledger.begin_or_get(&id, "fp").await.unwrap();

        assert_eq!(
            ledger.begin_or_get(&id, "fp").await,
            Err(LedgerError::InFlight("tx-6".to_string()))
        );
    }
}
