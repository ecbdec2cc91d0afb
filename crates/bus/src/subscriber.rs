//! Event subscriber trait for async event handling

use crate::error::BusError;
use crate::event::SettlementEvent;
use async_trait::async_trait;

/// Trait for event subscribers
///
/// Subscribers receive events from the event bus and process them asynchronously.
/// Each subscriber should be idempotent (handle duplicate events gracefully).
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Get the subscriber name (for logging)
    fn name(&self) -> &str;

    /// Handle a settlement event
    async fn handle(&self, event: &SettlementEvent) -> Result<(), BusError>;

    /// Called when the subscriber fell behind and events were dropped
    async fn on_lagged(&self, _skipped: u64) -> Result<(), BusError> {
        Ok(())
    }
}
