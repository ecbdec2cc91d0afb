//! SQLite-backed spin log
//!
//! Shares the settlement database. Reservation is a single
//! `INSERT ... SELECT ... WHERE count < limit`, so the limit check and the
//! insert happen under one write lock across every worker.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use coinledger_core::AccountId;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{ChanceError, ChanceResult};
use crate::spins::{SpinLog, SpinRecord, SpinReservation, SpinStatus};

#[derive(Clone)]
pub struct SqliteSpinLog {
    pool: SqlitePool,
}

impl SqliteSpinLog {
    /// Use an existing pool and create the schema
    pub async fn from_pool(pool: SqlitePool) -> ChanceResult<Self> {
        let log = Self { pool };
        log.init().await?;
        Ok(log)
    }

    async fn init(&self) -> ChanceResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS spins (
                draw_id TEXT PRIMARY KEY,
                account TEXT NOT NULL,
                game_id TEXT NOT NULL,
                day TEXT NOT NULL,
                status TEXT NOT NULL,
                reserved_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_spins_account_day ON spins(account, day)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn row_to_spin(row: &SqliteRow) -> ChanceResult<SpinRecord> {
    let draw_id: String = row.try_get("draw_id")?;
    let corrupt = |what: &str| ChanceError::Corrupt(format!("spin {draw_id}: {what}"));

    let account: String = row.try_get("account")?;
    let day: String = row.try_get("day")?;
    let status: String = row.try_get("status")?;
    let reserved_at: i64 = row.try_get("reserved_at")?;

    Ok(SpinRecord {
        account: AccountId::new(&account).map_err(|_| corrupt("account"))?,
        game_id: row.try_get("game_id")?,
        day: day.parse::<NaiveDate>().map_err(|_| corrupt("day"))?,
        status: status.parse::<SpinStatus>().map_err(|_| corrupt("status"))?,
        reserved_at: Utc
            .timestamp_millis_opt(reserved_at)
            .single()
            .ok_or_else(|| corrupt("reserved_at"))?,
        draw_id,
    })
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl SpinLog for SqliteSpinLog {
    async fn reserve(
        &self,
        spin: &SpinRecord,
        limit: u32,
        lease: Duration,
    ) -> ChanceResult<SpinReservation> {
        let day = spin.day.to_string();

        // A released row can vanish between the insert and the read; retry
        for _ in 0..3 {
            let taken_over = sqlx::query(
                r#"
                UPDATE spins SET reserved_at = ?4
                WHERE draw_id = ?1 AND account = ?2 AND game_id = ?3
                  AND status = 'pending' AND reserved_at < ?5
                "#,
            )
            .bind(spin.draw_id.as_str())
            .bind(spin.account.as_str())
            .bind(spin.game_id.as_str())
            .bind(millis(spin.reserved_at))
            .bind(millis(spin.reserved_at - lease))
            .execute(&self.pool)
            .await?
            .rows_affected()
                == 1;
            if taken_over {
                return Ok(SpinReservation::New);
            }

            let inserted = sqlx::query(
                r#"
                INSERT OR IGNORE INTO spins (draw_id, account, game_id, day, status, reserved_at)
                SELECT ?1, ?2, ?3, ?4, 'pending', ?5
                WHERE (SELECT COUNT(*) FROM spins WHERE account = ?2 AND day = ?4) < ?6
                "#,
            )
            .bind(spin.draw_id.as_str())
            .bind(spin.account.as_str())
            .bind(spin.game_id.as_str())
            .bind(day.as_str())
            .bind(millis(spin.reserved_at))
            .bind(i64::from(limit))
            .execute(&self.pool)
            .await?
            .rows_affected()
                == 1;
            if inserted {
                return Ok(SpinReservation::New);
            }

            if let Some(existing) = self.get(&spin.draw_id).await? {
                return Ok(SpinReservation::Taken(existing));
            }
            if self.count(&spin.account, spin.day).await? >= limit {
                return Ok(SpinReservation::LimitReached);
            }
        }

        Err(ChanceError::InFlight(spin.draw_id.clone()))
    }

    async fn mark_settled(&self, draw_id: &str) -> ChanceResult<()> {
        sqlx::query("UPDATE spins SET status = 'settled' WHERE draw_id = ?1")
            .bind(draw_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release(&self, draw_id: &str) -> ChanceResult<()> {
        sqlx::query("DELETE FROM spins WHERE draw_id = ?1 AND status = 'pending'")
            .bind(draw_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, draw_id: &str) -> ChanceResult<Option<SpinRecord>> {
        let row = sqlx::query("SELECT * FROM spins WHERE draw_id = ?1")
            .bind(draw_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_spin).transpose()
    }

    async fn count(&self, account: &AccountId, day: NaiveDate) -> ChanceResult<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM spins WHERE account = ?1 AND day = ?2")
            .bind(account.as_str())
            .bind(day.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}
