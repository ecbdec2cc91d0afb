//! Event bus errors

use thiserror::Error;

/// Errors that can occur in the event bus
#[derive(Error, Debug)]
pub enum BusError {
    #[error("Subscriber '{name}' failed: {reason}")]
    SubscriberFailed { name: String, reason: String },

    #[error("Journal error: {0}")]
    Journal(#[from] coinledger_events::EventError),

    #[error("Channel closed")]
    ChannelClosed,
}
