//! Error types for the sync engine.

use pushnote_protocol::{ProtocolError, ServiceId};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The REST API answered with an error status.
    #[error("api error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The server does not know the requested service.
    #[error("service {0} not found")]
    NotFound(ServiceId),

    /// Token fetch or bearer authorization failed.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(String),

    /// An event referenced a service that no longer exists locally.
    #[error("unresolved service {0}")]
    UnresolvedEntity(ServiceId),

    /// Not connected to the push server.
    #[error("not connected to server")]
    NotConnected,

    /// The serial operation queue has shut down.
    #[error("operation queue closed")]
    QueueClosed,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Api { status, .. } => *status >= 500,
            SyncError::NotConnected => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
