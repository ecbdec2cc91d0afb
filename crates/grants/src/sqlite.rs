//! SQLite-backed grant store
//!
//! Shares the settlement database. Times are unix milliseconds. Claims are
//! a single conditional `UPDATE`, so concurrent sweepers (threads or
//! processes) race on the row and exactly one wins.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use coinledger_core::{AccountId, Coins};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{GrantError, GrantResult};
use crate::grant::{Grant, GrantKind, GrantStatus, NewGrant};
use crate::store::GrantStore;

#[derive(Clone)]
pub struct SqliteGrantStore {
    pool: SqlitePool,
}

impl SqliteGrantStore {
    /// Use an existing pool and create the schema
    pub async fn from_pool(pool: SqlitePool) -> GrantResult<Self> {
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> GrantResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grants (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                subject TEXT NOT NULL,
                starts_at INTEGER NOT NULL,
                ends_at INTEGER NOT NULL,
                winner TEXT,
                prize INTEGER NOT NULL DEFAULT 0 CHECK (prize >= 0),
                status TEXT NOT NULL,
                claimed_at INTEGER,
                finalized_at INTEGER,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_grants_due ON grants(status, ends_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_grants_subject ON grants(subject, kind)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(id: &str, value: i64) -> GrantResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| GrantError::Corrupt(format!("{id}: timestamp {value}")))
}

fn row_to_grant(row: &SqliteRow) -> GrantResult<Grant> {
    let id: String = row.try_get("id")?;
    let corrupt = |what: &str| GrantError::Corrupt(format!("{id}: {what}"));

    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let subject: String = row.try_get("subject")?;
    let winner: Option<String> = row.try_get("winner")?;
    let prize: i64 = row.try_get("prize")?;
    let claimed_at: Option<i64> = row.try_get("claimed_at")?;
    let finalized_at: Option<i64> = row.try_get("finalized_at")?;
    let metadata: String = row.try_get("metadata")?;

    Ok(Grant {
        kind: kind.parse::<GrantKind>().map_err(|_| corrupt("kind"))?,
        status: status.parse::<GrantStatus>().map_err(|_| corrupt("status"))?,
        subject: AccountId::new(&subject).map_err(|_| corrupt("subject"))?,
        winner: winner
            .map(|w| AccountId::new(&w).map_err(|_| corrupt("winner")))
            .transpose()?,
        prize: Coins::new(prize).map_err(|_| corrupt("prize"))?,
        starts_at: from_millis(&id, row.try_get("starts_at")?)?,
        ends_at: from_millis(&id, row.try_get("ends_at")?)?,
        claimed_at: claimed_at.map(|v| from_millis(&id, v)).transpose()?,
        finalized_at: finalized_at.map(|v| from_millis(&id, v)).transpose()?,
        metadata: serde_json::from_str::<BTreeMap<String, serde_json::Value>>(&metadata)
            .map_err(|_| corrupt("metadata"))?,
        id,
    })
}

#[async_trait]
impl GrantStore for SqliteGrantStore {
    async fn create(&self, grant: NewGrant) -> GrantResult<Grant> {
        grant.validate()?;
        let grant = grant.into_grant();
        let metadata = serde_json::to_string(&grant.metadata)
            .map_err(|e| GrantError::Corrupt(e.to_string()))?;
        let prize = i64::try_from(grant.prize.value())
            .map_err(|_| GrantError::Corrupt(format!("{}: prize", grant.id)))?;

        sqlx::query(
            r#"
            INSERT INTO grants (id, kind, subject, starts_at, ends_at, prize, status, metadata)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(grant.id.as_str())
        .bind(grant.kind.as_str())
        .bind(grant.subject.as_str())
        .bind(millis(grant.starts_at))
        .bind(millis(grant.ends_at))
        .bind(prize)
        .bind(grant.status.as_str())
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        debug!(grant = %grant.id, kind = %grant.kind, subject = %grant.subject, "grant created");
        Ok(grant)
    }

    async fn get(&self, id: &str) -> GrantResult<Option<Grant>> {
        let row = sqlx::query("SELECT * FROM grants WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_grant).transpose()
    }

    async fn due(&self, now: DateTime<Utc>, lease: Duration) -> GrantResult<Vec<Grant>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM grants
            WHERE (status = 'active' AND ends_at < ?1)
               OR (status = 'finalizing' AND claimed_at < ?2)
            ORDER BY ends_at, id
            "#,
        )
        .bind(millis(now))
        .bind(millis(now - lease))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_grant).collect()
    }

    async fn claim(&self, id: &str, now: DateTime<Utc>, lease: Duration) -> GrantResult<bool> {
        let claimed = sqlx::query(
            r#"
            UPDATE grants SET status = 'finalizing', claimed_at = ?2
            WHERE id = ?1
              AND ((status = 'active' AND ends_at < ?2)
                OR (status = 'finalizing' AND claimed_at < ?3))
            "#,
        )
        .bind(id)
        .bind(millis(now))
        .bind(millis(now - lease))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if !claimed && self.get(id).await?.is_none() {
            return Err(GrantError::NotFound(id.to_string()));
        }
        Ok(claimed)
    }

    async fn release_claim(&self, id: &str) -> GrantResult<()> {
        sqlx::query(
            "UPDATE grants SET status = 'active', claimed_at = NULL
             WHERE id = ?1 AND status = 'finalizing'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_finalized(&self, id: &str, now: DateTime<Utc>) -> GrantResult<bool> {
        let done = sqlx::query(
            "UPDATE grants SET status = 'finalized', finalized_at = ?2
             WHERE id = ?1 AND status = 'finalizing'",
        )
        .bind(id)
        .bind(millis(now))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;
        Ok(done)
    }

    async fn assign_winner(&self, id: &str, winner: &AccountId) -> GrantResult<Grant> {
        let updated = sqlx::query(
            "UPDATE grants SET winner = ?2
             WHERE id = ?1 AND kind = 'feature_cycle' AND status = 'active'",
        )
        .bind(id)
        .bind(winner.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();

        let grant = self
            .get(id)
            .await?
            .ok_or_else(|| GrantError::NotFound(id.to_string()))?;
        if updated == 0 {
            return Err(if grant.kind != GrantKind::FeatureCycle {
                GrantError::NotACycle(id.to_string())
            } else {
                GrantError::AlreadyFinalized(id.to_string())
            });
        }
        Ok(grant)
    }

    async fn active_for(
        &self,
        subject: &AccountId,
        kind: GrantKind,
        now: DateTime<Utc>,
    ) -> GrantResult<Vec<Grant>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM grants
            WHERE subject = ?1 AND kind = ?2 AND status = 'active'
              AND starts_at <= ?3 AND ends_at > ?3
            ORDER BY ends_at, id
            "#,
        )
        .bind(subject.as_str())
        .bind(kind.as_str())
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_grant).collect()
    }

    async fn consume(&self, id: &str, now: DateTime<Utc>) -> GrantResult<bool> {
        let consumed = sqlx::query(
            r#"
            UPDATE grants SET status = 'consumed', finalized_at = ?2
            WHERE id = ?1 AND status = 'active' AND starts_at <= ?2 AND ends_at > ?2
            "#,
        )
        .bind(id)
        .bind(millis(now))
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if !consumed && self.get(id).await?.is_none() {
            return Err(GrantError::NotFound(id.to_string()));
        }
        Ok(consumed)
    }
}
