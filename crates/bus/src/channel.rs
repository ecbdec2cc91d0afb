//! In-process event bus

use crate::error::BusError;
use crate::event::SettlementEvent;
use crate::subscriber::EventSubscriber;
use coinledger_events::EventReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default number of buffered events per subscriber
pub const DEFAULT_CAPACITY: usize = 1024;

/// Event bus for distributing settlement events
///
/// Publishing never blocks the settlement path. Slow subscribers lag and
/// are told how many events they missed.
pub struct EventBus {
    sender: broadcast::Sender<SettlementEvent>,
    journal_path: Option<PathBuf>,
}

impl EventBus {
    /// Create a bus without a journal
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            journal_path: None,
        }
    }

    /// Attach the journal directory used for replay
    pub fn with_journal(mut self, journal_path: impl AsRef<Path>) -> Self {
        self.journal_path = Some(journal_path.as_ref().to_path_buf());
        self
    }

    /// Publish an event; returns how many subscribers received it
    pub fn publish(&self, event: SettlementEvent) -> usize {
        // Err only means nobody is listening
        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                debug!("no bus subscribers");
                0
            }
        }
    }

    /// Raw receiver
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.sender.subscribe()
    }

    /// Number of active receivers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Drive a subscriber on a background task until the bus is dropped
    pub fn spawn_subscriber(&self, subscriber: Arc<dyn EventSubscriber>) -> JoinHandle<()> {
        let mut receiver = self.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = subscriber.handle(&event).await {
                            warn!(subscriber = subscriber.name(), error = %e, "subscriber failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(subscriber = subscriber.name(), skipped, "subscriber lagged");
                        if let Err(e) = subscriber.on_lagged(skipped).await {
                            warn!(subscriber = subscriber.name(), error = %e, "lag handler failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Get a journal reader for replay
    pub fn reader(&self) -> Result<EventReader, BusError> {
        match self.journal_path {
            Some(ref path) => Ok(EventReader::from_directory(path)?),
            None => Err(BusError::ChannelClosed),
        }
    }

    /// Get the journal path
    pub fn journal_path(&self) -> Option<&Path> {
        self.journal_path.as_deref()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
