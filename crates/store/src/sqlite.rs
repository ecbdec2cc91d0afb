//! SQLite-backed balance store and idempotency ledger
//!
//! Balances are mutated with conditional `UPDATE ... WHERE col + delta >= 0`
//! statements inside one transaction per batch, never read-modify-write.
//! The idempotency table's primary key is the uniqueness guarantee.

use crate::error::{StoreError, StoreResult};
use crate::traits::{expectations, merge_deltas, AccountDelta, BalanceStore};
use async_trait::async_trait;
use chrono::Utc;
use coinledger_core::{AccountId, BalanceDelta, Balances, CoinClass, Coins};
use coinledger_ledger::{
    IdempotencyLedger, LedgerError, LedgerResult, Reservation, SettlementReceipt, TransactionId,
    TransactionStatus, IN_FLIGHT_WAIT,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Durable store for balances and processed transaction ids
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    in_flight_wait: Duration,
    poll_interval: Duration,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub async fn connect(path: impl AsRef<Path>) -> StoreResult<Self> {
        let url = format!("sqlite:{}", path.as_ref().display());
        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// Create an in-memory store (for testing)
    pub async fn in_memory() -> StoreResult<Self> {
        // One connection: every `:memory:` connection is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and create the schema
    pub async fn from_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self {
            pool,
            in_flight_wait: IN_FLIGHT_WAIT,
            poll_interval: Duration::from_millis(20),
        };
        store.init().await?;
        Ok(store)
    }

    /// How long a duplicate waits for an in-flight attempt
    pub fn with_in_flight_wait(mut self, wait: Duration) -> Self {
        self.in_flight_wait = wait;
        self
    }

    pub fn in_flight_wait(&self) -> Duration {
        self.in_flight_wait
    }

    /// Shared pool (grant, risk and spin tables live in the same database)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                free INTEGER NOT NULL DEFAULT 0 CHECK (free >= 0),
                purchased INTEGER NOT NULL DEFAULT 0 CHECK (purchased >= 0),
                earned INTEGER NOT NULL DEFAULT 0 CHECK (earned >= 0),
                total_earned INTEGER NOT NULL DEFAULT 0 CHECK (total_earned >= 0),
                total_spent INTEGER NOT NULL DEFAULT 0 CHECK (total_spent >= 0),
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS idempotency (
                transaction_id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                status TEXT NOT NULL,
                receipt_json TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_idempotency_status
            ON idempotency(status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn apply_one(
        tx: &mut Transaction<'_, Sqlite>,
        account: &AccountId,
        delta: &BalanceDelta,
        now: i64,
    ) -> StoreResult<Balances> {
        sqlx::query(
            "INSERT INTO accounts (id, created_at, updated_at) VALUES (?1, ?2, ?2)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(account.as_str())
        .bind(now)
        .execute(&mut **tx)
        .await?;

        let earned_accrued = to_i64(account, CoinClass::Earned, delta.earned_accrued)?;
        let spent = to_i64(account, CoinClass::Purchased, delta.spent)?;

        let updated = sqlx::query(
            r#"
            UPDATE accounts SET
                free = free + ?2,
                purchased = purchased + ?3,
                earned = earned + ?4,
                total_earned = total_earned + ?5,
                total_spent = total_spent + ?6,
                updated_at = ?7
            WHERE id = ?1
              AND free + ?2 >= 0
              AND purchased + ?3 >= 0
              AND earned + ?4 >= 0
            "#,
        )
        .bind(account.as_str())
        .bind(delta.free)
        .bind(delta.purchased)
        .bind(delta.earned)
        .bind(earned_accrued)
        .bind(spent)
        .bind(now)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?1")
            .bind(account.as_str())
            .fetch_one(&mut **tx)
            .await?;
        let current = row_to_balances(account, &row)?;

        if updated == 0 {
            // Report which class fell short
            return match current.apply(delta) {
                Err(err) => Err(StoreError::from_balance(account, err)),
                Ok(_) => Err(StoreError::Corrupt(account.to_string())),
            };
        }

        Ok(current)
    }

    async fn fetch_slot(&self, id: &TransactionId) -> LedgerResult<Option<SqliteRow>> {
        sqlx::query(
            "SELECT fingerprint, status, receipt_json FROM idempotency WHERE transaction_id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)
    }
}

fn to_i64(account: &AccountId, class: CoinClass, coins: Coins) -> StoreResult<i64> {
    i64::try_from(coins.value()).map_err(|_| StoreError::Overflow {
        account: account.clone(),
        class,
    })
}

fn column(account: &AccountId, row: &SqliteRow, name: &str) -> StoreResult<Coins> {
    let value: i64 = row.try_get(name)?;
    Coins::new(value).map_err(|_| StoreError::Corrupt(format!("{account}.{name}")))
}

fn row_to_balances(account: &AccountId, row: &SqliteRow) -> StoreResult<Balances> {
    Ok(Balances {
        free: column(account, row, "free")?,
        purchased: column(account, row, "purchased")?,
        earned: column(account, row, "earned")?,
        total_earned: column(account, row, "total_earned")?,
        total_spent: column(account, row, "total_spent")?,
    })
}

fn storage(err: sqlx::Error) -> LedgerError {
    LedgerError::Storage(err.to_string())
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl BalanceStore for SqliteStore {
    async fn get_balances(&self, account: &AccountId) -> StoreResult<Balances> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?1")
            .bind(account.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row_to_balances(account, &row),
            None => Ok(Balances::default()),
        }
    }

    async fn apply_batch(
        &self,
        deltas: &[AccountDelta],
    ) -> StoreResult<BTreeMap<AccountId, Balances>> {
        let merged = merge_deltas(deltas);
        let now = now_millis();

        let mut tx = self.pool.begin().await?;
        let mut updated = BTreeMap::new();
        for (account, delta) in &merged {
            // Dropping `tx` on error rolls back every earlier statement
            let balances = Self::apply_one(&mut tx, account, delta, now).await?;
            updated.insert(account.clone(), balances);
        }

        // Checked after the writes so the comparison runs under the write lock
        for (account, class, expected) in expectations(deltas) {
            let after = updated.get(account).copied().unwrap_or_default();
            let change = merged.get(account).map(|d| d.get(class)).unwrap_or(0);
            let before = i128::from(after.get(class).value()) - i128::from(change);
            let found = Coins::from(u64::try_from(before).unwrap_or(0));
            if found != expected {
                return Err(StoreError::Stale {
                    account: account.clone(),
                    class,
                    expected,
                    found,
                });
            }
        }
        tx.commit().await?;

        debug!(accounts = updated.len(), "balance batch committed");
        Ok(updated)
    }

    async fn open_account(
        &self,
        account: &AccountId,
        initial: Balances,
    ) -> StoreResult<(Balances, bool)> {
        let now = now_millis();
        let created = sqlx::query(
            r#"
            INSERT INTO accounts (id, free, purchased, earned, total_earned, total_spent, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(account.as_str())
        .bind(to_i64(account, CoinClass::Free, initial.free)?)
        .bind(to_i64(account, CoinClass::Purchased, initial.purchased)?)
        .bind(to_i64(account, CoinClass::Earned, initial.earned)?)
        .bind(to_i64(account, CoinClass::Earned, initial.total_earned)?)
        .bind(to_i64(account, CoinClass::Purchased, initial.total_spent)?)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        let balances = self.get_balances(account).await?;
        Ok((balances, created))
    }
}

#[async_trait]
impl IdempotencyLedger for SqliteStore {
    async fn begin_or_get(
        &self,
        id: &TransactionId,
        fingerprint: &str,
    ) -> LedgerResult<Reservation> {
        let deadline = Instant::now() + self.in_flight_wait;

        loop {
            let now = now_millis();
            let inserted = sqlx::query(
                r#"
                INSERT INTO idempotency (transaction_id, fingerprint, status, receipt_json, created_at, updated_at)
                VALUES (?1, ?2, ?3, NULL, ?4, ?4)
                ON CONFLICT(transaction_id) DO NOTHING
                "#,
            )
            .bind(id.as_str())
            .bind(fingerprint)
            .bind(TransactionStatus::Pending.as_str())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(storage)?
            .rows_affected();

            if inserted == 1 {
                return Ok(Reservation::New);
            }

            // Released between our insert and select: try again
            let Some(row) = self.fetch_slot(id).await? else {
                continue;
            };

            let stored: String = row.try_get("fingerprint").map_err(storage)?;
            if stored != fingerprint {
                return Err(LedgerError::FingerprintMismatch(id.to_string()));
            }

            let status: String = row.try_get("status").map_err(storage)?;
            if status == TransactionStatus::Committed.as_str() {
                let json: Option<String> = row.try_get("receipt_json").map_err(storage)?;
                let json = json.ok_or_else(|| LedgerError::Storage(format!("{id} has no receipt")))?;
                let receipt: SettlementReceipt = serde_json::from_str(&json)?;
                return Ok(Reservation::Replay(receipt));
            }

            if Instant::now() >= deadline {
                return Err(LedgerError::InFlight(id.to_string()));
            }
            debug!(transaction_id = %id, "waiting for in-flight attempt");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn commit(&self, id: &TransactionId, receipt: &SettlementReceipt) -> LedgerResult<()> {
        let json = serde_json::to_string(receipt)?;
        let rows = sqlx::query(
            r#"
            UPDATE idempotency SET status = ?2, receipt_json = ?3, updated_at = ?4
            WHERE transaction_id = ?1 AND status = ?5
            "#,
        )
        .bind(id.as_str())
        .bind(TransactionStatus::Committed.as_str())
        .bind(json)
        .bind(now_millis())
        .bind(TransactionStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage)?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::NotReserved(id.to_string()));
        }
        Ok(())
    }

    async fn release(&self, id: &TransactionId) -> LedgerResult<()> {
        sqlx::query("DELETE FROM idempotency WHERE transaction_id = ?1 AND status = ?2")
            .bind(id.as_str())
            .bind(TransactionStatus::Pending.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn lookup(&self, id: &TransactionId) -> LedgerResult<Option<SettlementReceipt>> {
        let row = sqlx::query(
            "SELECT receipt_json FROM idempotency WHERE transaction_id = ?1 AND status = ?2",
        )
        .bind(id.as_str())
        .bind(TransactionStatus::Committed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => {
                let json: Option<String> = row.try_get("receipt_json").map_err(storage)?;
                match json {
                    Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                    None => Ok(None),
                }
            }
            None => Ok(None),
        }
    }
}
