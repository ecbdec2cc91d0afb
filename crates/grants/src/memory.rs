//! In-memory grant store

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use coinledger_core::AccountId;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::{GrantError, GrantResult};
use crate::grant::{Grant, GrantKind, GrantStatus, NewGrant};
use crate::store::GrantStore;

#[derive(Default)]
pub struct MemoryGrantStore {
    grants: Mutex<HashMap<String, Grant>>,
}

impl MemoryGrantStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn claimable(grant: &Grant, now: DateTime<Utc>, lease: Duration) -> bool {
    match grant.status {
        GrantStatus::Active => grant.ends_at < now,
        GrantStatus::Finalizing => grant.claimed_at.is_some_and(|at| at < now - lease),
        GrantStatus::Finalized | GrantStatus::Consumed => false,
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn create(&self, grant: NewGrant) -> GrantResult<Grant> {
        grant.validate()?;
        let grant = grant.into_grant();
        self.grants
            .lock()
            .await
            .insert(grant.id.clone(), grant.clone());
        Ok(grant)
    }

    async fn get(&self, id: &str) -> GrantResult<Option<Grant>> {
        Ok(self.grants.lock().await.get(id).cloned())
    }

    async fn due(&self, now: DateTime<Utc>, lease: Duration) -> GrantResult<Vec<Grant>> {
        let grants = self.grants.lock().await;
        let mut due: Vec<Grant> = grants
            .values()
            .filter(|g| claimable(g, now, lease))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.ends_at.cmp(&b.ends_at).then_with(|| a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn claim(&self, id: &str, now: DateTime<Utc>, lease: Duration) -> GrantResult<bool> {
        let mut grants = self.grants.lock().await;
        match grants.get_mut(id) {
            Some(grant) if claimable(grant, now, lease) => {
                grant.status = GrantStatus::Finalizing;
                grant.claimed_at = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(GrantError::NotFound(id.to_string())),
        }
    }

    async fn release_claim(&self, id: &str) -> GrantResult<()> {
        let mut grants = self.grants.lock().await;
        if let Some(grant) = grants.get_mut(id) {
            if grant.status == GrantStatus::Finalizing {
                grant.status = GrantStatus::Active;
                grant.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn mark_finalized(&self, id: &str, now: DateTime<Utc>) -> GrantResult<bool> {
        let mut grants = self.grants.lock().await;
        match grants.get_mut(id) {
            Some(grant) if grant.status == GrantStatus::Finalizing => {
                grant.status = GrantStatus::Finalized;
                grant.finalized_at = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(GrantError::NotFound(id.to_string())),
        }
    }

    async fn assign_winner(&self, id: &str, winner: &AccountId) -> GrantResult<Grant> {
        let mut grants = self.grants.lock().await;
        let grant = grants
            .get_mut(id)
            .ok_or_else(|| GrantError::NotFound(id.to_string()))?;
        if grant.kind != GrantKind::FeatureCycle {
            return Err(GrantError::NotACycle(id.to_string()));
        }
        if grant.status != GrantStatus::Active {
            return Err(GrantError::AlreadyFinalized(id.to_string()));
        }
        grant.winner = Some(winner.clone());
        Ok(grant.clone())
    }

    async fn active_for(
        &self,
        subject: &AccountId,
        kind: GrantKind,
        now: DateTime<Utc>,
    ) -> GrantResult<Vec<Grant>> {
        let grants = self.grants.lock().await;
        let mut active: Vec<Grant> = grants
            .values()
            .filter(|g| &g.subject == subject && g.kind == kind && g.is_active_at(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.ends_at.cmp(&b.ends_at).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn consume(&self, id: &str, now: DateTime<Utc>) -> GrantResult<bool> {
        let mut grants = self.grants.lock().await;
        match grants.get_mut(id) {
            Some(grant) if grant.is_active_at(now) => {
                grant.status = GrantStatus::Consumed;
                grant.finalized_at = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(GrantError::NotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coinledger_core::Coins;

    fn subject() -> AccountId {
        AccountId::new("stream-1").unwrap()
    }

    async fn expired_cycle(store: &MemoryGrantStore, now: DateTime<Utc>) -> Grant {
        store
            .create(
                NewGrant::new(
                    GrantKind::FeatureCycle,
                    subject(),
                    now - Duration::hours(2),
                    now - Duration::hours(1),
                )
                .with_prize(Coins::from(100)),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryGrantStore::new();
        let now = Utc::now();
        let grant = expired_cycle(&store, now).await;
        let lease = Duration::minutes(5);

        assert!(store.claim(&grant.id, now, lease).await.unwrap());
        assert!(!store.claim(&grant.id, now, lease).await.unwrap());
        assert!(store.due(now, lease).await.unwrap().is_empty());

        // An abandoned claim becomes claimable after the lease
        let later = now + Duration::minutes(6);
        assert_eq!(store.due(later, lease).await.unwrap().len(), 1);
        assert!(store.claim(&grant.id, later, lease).await.unwrap());
        assert!(store.mark_finalized(&grant.id, later).await.unwrap());
        assert!(!store.claim(&grant.id, later + Duration::hours(1), lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_claim_makes_grant_due_again() {
        let store = MemoryGrantStore::new();
        let now = Utc::now();
        let grant = expired_cycle(&store, now).await;
        let lease = Duration::minutes(5);

        store.claim(&grant.id, now, lease).await.unwrap();
        store.release_claim(&grant.id).await.unwrap();
        assert_eq!(store.due(now, lease).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_assign_winner_rules() {
        let store = MemoryGrantStore::new();
        let now = Utc::now();
        let cycle = expired_cycle(&store, now).await;
        let winner = AccountId::new("bob").unwrap();

        let updated = store.assign_winner(&cycle.id, &winner).await.unwrap();
        assert_eq!(updated.winner, Some(winner.clone()));

        let officer = store
            .create(NewGrant::new(
                GrantKind::OfficerAssignment,
                subject(),
                now,
                now + Duration::hours(1),
            ))
            .await
            .unwrap();
        assert!(matches!(
            store.assign_winner(&officer.id, &winner).await,
            Err(GrantError::NotACycle(_))
        ));
        assert!(matches!(
            store.assign_winner("missing", &winner).await,
            Err(GrantError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = MemoryGrantStore::new();
        let now = Utc::now();
        let insurance = store
            .create(NewGrant::new(
                GrantKind::Insurance,
                subject(),
                now,
                now + Duration::hours(24),
            ))
            .await
            .unwrap();

        let active = store
            .active_for(&subject(), GrantKind::Insurance, now)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);

        assert!(store.consume(&insurance.id, now).await.unwrap());
        assert!(!store.consume(&insurance.id, now).await.unwrap());
        assert!(store
            .active_for(&subject(), GrantKind::Insurance, now)
            .await
            .unwrap()
            .is_empty());
    }
}
