//! Error types for the sync engine.

use serde::{Deserialize, Serialize};
use tabsync_protocol::ProtocolError;
use tabsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the transport layer may retry the call.
        retryable: bool,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// Malformed response from the server.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credentials were rejected.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Server rejected the request, including pushes against a stale ETag.
    #[error("server error: {0}")]
    ServerError(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A version tag could not be read.
    #[error("tag error: {0}")]
    Tag(#[from] ProtocolError),

    /// The table does not exist locally.
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// A state change the processor does not allow.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

/// Coarse classification of a failure, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Remote unreachable or the exchange broke down.
    Io,
    /// Credentials expired or were rejected.
    Authorization,
    /// Anything else; indicates a bug rather than an environment issue.
    Unexpected,
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

    /// Returns true if the transport layer may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout | SyncError::NotConnected => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }

    /// Classifies the error.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Transport { .. }
            | SyncError::Timeout
            | SyncError::NotConnected
            | SyncError::Protocol(_)
            | SyncError::ServerError(_) => FailureKind::Io,
            SyncError::AuthenticationFailed(_) => FailureKind::Authorization,
            SyncError::Store(StoreError::Io(_)) => FailureKind::Io,
            SyncError::Store(_)
            | SyncError::Tag(_)
            | SyncError::TableNotFound(_)
            | SyncError::InvalidStateTransition { .. } => FailureKind::Unexpected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::AuthenticationFailed("expired".into()).is_retryable());
    }

    #[test]
    fn classification() {
        assert_eq!(SyncError::Timeout.failure_kind(), FailureKind::Io);
        assert_eq!(
            SyncError::ServerError("stale table etag".into()).failure_kind(),
            FailureKind::Io
        );
        assert_eq!(
            SyncError::AuthenticationFailed("expired".into()).failure_kind(),
            FailureKind::Authorization
        );
        assert_eq!(
            SyncError::Store(StoreError::TableNotFound("t".into())).failure_kind(),
            FailureKind::Unexpected
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(SyncError::Store(io.into()).failure_kind(), FailureKind::Io);
    }

    #[test]
    fn error_display() {
        assert_eq!(SyncError::NotConnected.to_string(), "not connected to server");
        let err = SyncError::InvalidStateTransition {
            from: "deleting".into(),
            to: "rest".into(),
        };
        assert!(err.to_string().contains("deleting"));
    }
}
