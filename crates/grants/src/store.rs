//! Grant store contract

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use coinledger_core::AccountId;

use crate::error::GrantResult;
use crate::grant::{Grant, GrantKind, NewGrant};

/// Durable grant table
///
/// `claim` is the only path from `Active` to `Finalizing` and must be an
/// atomic conditional update: of any number of concurrent claimers exactly
/// one gets `true`.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn create(&self, grant: NewGrant) -> GrantResult<Grant>;

    async fn get(&self, id: &str) -> GrantResult<Option<Grant>>;

    /// Active grants with `ends_at < now`, plus claims older than `lease`
    async fn due(&self, now: DateTime<Utc>, lease: Duration) -> GrantResult<Vec<Grant>>;

    /// Take the finalization claim
    async fn claim(&self, id: &str, now: DateTime<Utc>, lease: Duration) -> GrantResult<bool>;

    /// Give a claim back after a failed finalization
    async fn release_claim(&self, id: &str) -> GrantResult<()>;

    /// Finish a claimed grant
    async fn mark_finalized(&self, id: &str, now: DateTime<Utc>) -> GrantResult<bool>;

    /// Set the winner of an active cycle
    async fn assign_winner(&self, id: &str, winner: &AccountId) -> GrantResult<Grant>;

    /// Grants of `kind` held by `subject` and in effect at `now`
    async fn active_for(
        &self,
        subject: &AccountId,
        kind: GrantKind,
        now: DateTime<Utc>,
    ) -> GrantResult<Vec<Grant>>;

    /// Use up an active grant before expiry; `false` if someone else did
    async fn consume(&self, id: &str, now: DateTime<Utc>) -> GrantResult<bool>;
}
