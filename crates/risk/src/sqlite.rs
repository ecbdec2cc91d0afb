//! SQLite-backed risk store
//!
//! Lives in the settlement database next to `accounts`. Every change is one
//! upsert with `RETURNING`, so concurrent workers never lose an update.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use coinledger_core::AccountId;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{RiskError, RiskResult};
use crate::event::RiskEvent;
use crate::state::RiskProfile;
use crate::store::RiskStore;

#[derive(Clone)]
pub struct SqliteRiskStore {
    pool: SqlitePool,
}

impl SqliteRiskStore {
    /// Use an existing pool and create the schema
    pub async fn from_pool(pool: SqlitePool) -> RiskResult<Self> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> RiskResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS risk_profiles (
                account TEXT PRIMARY KEY,
                risk_score INTEGER NOT NULL DEFAULT 0 CHECK (risk_score >= 0),
                is_frozen INTEGER NOT NULL DEFAULT 0,
                freeze_reason TEXT,
                last_event_at INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_risk_score ON risk_profiles(risk_score)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn corrupt(account: &str, what: &str) -> RiskError {
    RiskError::Corrupt {
        line: 0,
        reason: format!("risk_profiles row {account}: {what}"),
    }
}

fn row_to_profile(row: &SqliteRow) -> RiskResult<RiskProfile> {
    let account: String = row.try_get("account")?;
    let risk_score: i64 = row.try_get("risk_score")?;
    let is_frozen: bool = row.try_get("is_frozen")?;
    let last_event_at: Option<i64> = row.try_get("last_event_at")?;

    Ok(RiskProfile {
        risk_score: u64::try_from(risk_score).map_err(|_| corrupt(&account, "risk_score"))?,
        is_frozen,
        freeze_reason: row.try_get("freeze_reason")?,
        last_event_at: last_event_at
            .map(|ms| {
                Utc.timestamp_millis_opt(ms)
                    .single()
                    .ok_or_else(|| corrupt(&account, "last_event_at"))
            })
            .transpose()?,
        account: AccountId::new(&account).map_err(|_| corrupt(&account, "account"))?,
    })
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

#[async_trait]
impl RiskStore for SqliteRiskStore {
    async fn profile(&self, account: &AccountId) -> RiskResult<Option<RiskProfile>> {
        let row = sqlx::query("SELECT * FROM risk_profiles WHERE account = ?1")
            .bind(account.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn apply(&self, event: &RiskEvent) -> RiskResult<RiskProfile> {
        let at = millis(event.timestamp());
        let query = match event {
            RiskEvent::Frozen { account, reason, .. } => sqlx::query(
                r#"
                INSERT INTO risk_profiles (account, is_frozen, freeze_reason, last_event_at)
                VALUES (?1, 1, ?2, ?3)
                ON CONFLICT(account) DO UPDATE SET
                    is_frozen = 1,
                    freeze_reason = excluded.freeze_reason,
                    last_event_at = excluded.last_event_at
                RETURNING *
                "#,
            )
            .bind(account.as_str())
            .bind(reason.clone())
            .bind(at),
            RiskEvent::Unfrozen { account, .. } => sqlx::query(
                r#"
                INSERT INTO risk_profiles (account, is_frozen, last_event_at)
                VALUES (?1, 0, ?2)
                ON CONFLICT(account) DO UPDATE SET
                    is_frozen = 0,
                    freeze_reason = NULL,
                    last_event_at = excluded.last_event_at
                RETURNING *
                "#,
            )
            .bind(account.as_str())
            .bind(at),
            RiskEvent::ScoreRaised {
                account, points, ..
            } => {
                let points = i64::try_from(*points).map_err(|_| {
                    RiskError::InvalidSignal(format!("{points} points out of range"))
                })?;
                sqlx::query(
                    r#"
                    INSERT INTO risk_profiles (account, risk_score, last_event_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(account) DO UPDATE SET
                        risk_score = risk_score + excluded.risk_score,
                        last_event_at = excluded.last_event_at
                    RETURNING *
                    "#,
                )
                .bind(account.as_str())
                .bind(points)
                .bind(at)
            }
        };

        let row = query.fetch_one(&self.pool).await?;
        row_to_profile(&row)
    }

    async fn apply_over_threshold(
        &self,
        event: &RiskEvent,
        threshold: u64,
    ) -> RiskResult<Option<RiskProfile>> {
        let RiskEvent::Frozen { account, reason, .. } = event else {
            return Err(RiskError::InvalidSignal(
                "only freezes are applied at a threshold".to_string(),
            ));
        };
        let threshold = i64::try_from(threshold).unwrap_or(i64::MAX);

        let row = sqlx::query(
            r#"
            UPDATE risk_profiles
            SET is_frozen = 1, freeze_reason = ?2, last_event_at = ?3
            WHERE account = ?1 AND is_frozen = 0 AND risk_score >= ?4
            RETURNING *
            "#,
        )
        .bind(account.as_str())
        .bind(reason.clone())
        .bind(millis(event.timestamp()))
        .bind(threshold)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn frozen_count(&self) -> RiskResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM risk_profiles WHERE is_frozen = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn top_risk(&self, n: usize) -> RiskResult<Vec<RiskProfile>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM risk_profiles
            WHERE risk_score > 0
            ORDER BY risk_score DESC, account
            LIMIT ?1
            "#,
        )
        .bind(i64::try_from(n).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_profile).collect()
    }
}
