//! Application context - wires everything together

use chrono::{DateTime, Utc};
use coinledger_bus::{EventBus, SettlementEvent};
use coinledger_chance::{ChanceError, SpinOutcome, SqliteSpinLog, Wheel};
use coinledger_core::AccountId;
use coinledger_events::{EventError, EventReader, EventStore};
use coinledger_grants::{ExpirySweeper, SqliteGrantStore, SweepError};
use coinledger_risk::{
    RiskError, RiskGate, RiskLedger, RiskOverview, RiskProfile, RiskSignal, SqliteRiskStore,
};
use coinledger_settlement::{SettleRequest, SettleResponse, TransactionProcessor};
use coinledger_store::SqliteStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;

/// Application context - wires together all components
pub struct AppContext {
    pub config: AppConfig,
    pub processor: Arc<TransactionProcessor>,
    pub risk: Arc<RiskGate>,
    pub bus: Arc<EventBus>,
    pub grants: Arc<SqliteGrantStore>,
    pub sweeper: Arc<ExpirySweeper>,
    pub wheel: Wheel,
    journal_path: PathBuf,
    db_path: PathBuf,
}

impl AppContext {
    /// Open the data directory with `<data>/coinledger.json` if present
    pub async fn new(data_path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let config = AppConfig::load(data_path.as_ref())?;
        Self::with_config(data_path, config).await
    }

    /// Open the data directory with an explicit configuration
    pub async fn with_config(
        data_path: impl AsRef<Path>,
        config: AppConfig,
    ) -> Result<Self, anyhow::Error> {
        let data_path = data_path.as_ref();
        let journal_path = data_path.join("journal");
        let db_path = data_path.join("ledger.db");

        // Create directories
        std::fs::create_dir_all(&journal_path)?;

        // Every table lives in one database shared by all workers
        let store = Arc::new(SqliteStore::connect(&db_path).await?);
        let grants = Arc::new(SqliteGrantStore::from_pool(store.pool().clone()).await?);
        let spins = Arc::new(SqliteSpinLog::from_pool(store.pool().clone()).await?);
        let risk = Arc::new(RiskGate::with_store(
            Arc::new(SqliteRiskStore::from_pool(store.pool().clone()).await?),
            RiskLedger::new(data_path.join("risk.jsonl"))?,
            config.risk.clone(),
        ));
        let bus = Arc::new(EventBus::new().with_journal(&journal_path));

        let processor = Arc::new(
            TransactionProcessor::new(
                store.clone(),
                store,
                risk.clone(),
                config.settlement.clone(),
            )
            .with_journal(EventStore::new(&journal_path)?)
            .with_bus(bus.clone()),
        );

        let sweeper = Arc::new(ExpirySweeper::new(
            grants.clone(),
            processor.clone(),
            config.sweeper.clone(),
        ));
        let wheel = Wheel::new(processor.clone(), grants.clone(), spins, config.wheel.clone());

        info!(data = %data_path.display(), "context ready");

        Ok(Self {
            config,
            processor,
            risk,
            bus,
            grants,
            sweeper,
            wheel,
            journal_path,
            db_path,
        })
    }

    /// `POST settle`
    pub async fn settle(&self, request: &SettleRequest) -> SettleResponse {
        let result = self.processor.settle(request).await;
        SettleResponse::from_result(&request.transaction_id, &result)
    }

    /// `POST freeze`
    pub async fn freeze(
        &self,
        account: &AccountId,
        reason: Option<String>,
        performed_by: &str,
    ) -> Result<RiskProfile, ServiceError> {
        let profile = self.risk.freeze(account, reason, performed_by).await?;
        self.bus.publish(SettlementEvent::freeze_changed(
            account.clone(),
            true,
            profile.freeze_reason.clone(),
        ));
        Ok(profile)
    }

    /// `POST unfreeze`
    pub async fn unfreeze(
        &self,
        account: &AccountId,
        performed_by: &str,
    ) -> Result<RiskProfile, ServiceError> {
        let profile = self.risk.unfreeze(account, performed_by).await?;
        self.bus
            .publish(SettlementEvent::freeze_changed(account.clone(), false, None));
        Ok(profile)
    }

    /// Record a fraud signal; announces an automatic freeze if one happened
    pub async fn raise_risk_score(
        &self,
        account: &AccountId,
        signal: RiskSignal,
    ) -> Result<RiskProfile, ServiceError> {
        let (profile, froze) = self.risk.raise(account, signal).await?;
        if froze {
            self.bus.publish(SettlementEvent::freeze_changed(
                account.clone(),
                true,
                profile.freeze_reason.clone(),
            ));
        }
        Ok(profile)
    }

    /// `GET riskOverview`
    pub async fn risk_overview(&self) -> Result<RiskOverview, ServiceError> {
        Ok(self.risk.default_overview().await?)
    }

    /// `POST draw`
    pub async fn draw(
        &self,
        account: &AccountId,
        game_id: &str,
        draw_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SpinOutcome, ServiceError> {
        Ok(self.wheel.spin(account, game_id, draw_id, now).await?)
    }

    /// One on-demand sweep
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<coinledger_grants::SweepReport, ServiceError> {
        Ok(self.sweeper.sweep(now).await?)
    }

    pub fn journal(&self) -> Result<EventReader, ServiceError> {
        Ok(EventReader::from_directory(&self.journal_path)?)
    }

    /// Get journal path
    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

/// Errors from the administrative and game operations
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Risk error: {0}")]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Chance(#[from] ChanceError),

    #[error(transparent)]
    Sweep(#[from] SweepError),

    #[error("Journal error: {0}")]
    Journal(#[from] EventError),
}
