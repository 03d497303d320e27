//! Dispatcher error types.

use thiserror::Error;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job launch failed: {0}")]
    Launch(String),

    #[error("Overlay lookup failed: {0}")]
    OverlayLookup(String),

    #[error("Dispatch ledger error: {0}")]
    Ledger(String),

    #[error("Queue error: {0}")]
    Queue(#[from] vodpipe_queue::QueueError),

    #[error("Status store error: {0}")]
    Status(#[from] vodpipe_firestore::FirestoreError),
}

impl DispatchError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    pub fn overlay_lookup(msg: impl Into<String>) -> Self {
        Self::OverlayLookup(msg.into())
    }

    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Whether leaving the message for redelivery can help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConfigError(_) => false,
            Self::Queue(e) => e.is_transient(),
            _ => true,
        }
    }
}
