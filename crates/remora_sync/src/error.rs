//! Error types for the scheduler and paginator.

use crate::transport::TransportError;
use remora_core::{CoreError, WireDocument};
use std::fmt;
use thiserror::Error;

/// Result type for remote operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by `fetch`, `push`, `delete` and `find`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A response was well-formed JSON but had the wrong shape.
    #[error("data format error: {message}")]
    DataFormat {
        /// Description of the violation.
        message: String,
    },

    /// The server answered with an error.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Local model error (decode failure, invalid operation).
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// The operation needs a refid and the entity has none.
    #[error("entity has not been saved to the server")]
    NotPersisted,

    /// A synchronous caller stopped waiting; the worker keeps running.
    #[error("gave up waiting for the background worker")]
    WaitAbandoned,

    /// The background worker panicked or vanished before reporting.
    #[error("background worker terminated without a result")]
    WorkerLost,

    /// The background worker could not be started.
    #[error("failed to spawn background worker: {message}")]
    Spawn {
        /// OS error text.
        message: String,
    },
}

impl SyncError {
    /// Creates a data format error.
    pub fn data_format(message: impl Into<String>) -> Self {
        Self::DataFormat {
            message: message.into(),
        }
    }

    /// Creates a spawn error.
    pub fn spawn(message: impl Into<String>) -> Self {
        Self::Spawn {
            message: message.into(),
        }
    }

    /// Returns true for malformed server data, whether it was caught by the
    /// paginator or by the wire codec.
    pub fn is_data_format(&self) -> bool {
        match self {
            SyncError::DataFormat { .. } => true,
            SyncError::Core(e) => e.is_data_format(),
            _ => false,
        }
    }

    /// Returns the server error, if this is one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            SyncError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

/// How an error response was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorKind {
    /// The body carried `error_code` / `error_message`.
    Server,
    /// 404 without a structured body.
    NotFound,
    /// The body was not valid JSON.
    InvalidJson,
    /// Any other unexpected status.
    Status,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteErrorKind::Server => "server error",
            RemoteErrorKind::NotFound => "not found",
            RemoteErrorKind::InvalidJson => "invalid json",
            RemoteErrorKind::Status => "unexpected status",
        };
        f.write_str(name)
    }
}

/// An error reported by (or inferred from) a server response.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} (HTTP {status}): {message}")]
pub struct RemoteError {
    /// HTTP status code.
    pub status: u16,
    /// Classification.
    pub kind: RemoteErrorKind,
    /// `error_code` from the body, when present.
    pub code: Option<i64>,
    /// `error_message` from the body, or a generated description.
    pub message: String,
    /// `error_details` from the body, when present.
    pub details: Option<WireDocument>,
}

impl RemoteError {
    /// Error described by the server itself.
    pub fn server(
        status: u16,
        code: i64,
        message: impl Into<String>,
        details: Option<WireDocument>,
    ) -> Self {
        Self {
            status,
            kind: RemoteErrorKind::Server,
            code: Some(code),
            message: message.into(),
            details,
        }
    }

    /// Error inferred from the status line and an unusable body.
    pub fn inferred(status: u16, kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            code: None,
            message: message.into(),
            details: None,
        }
    }

    /// Returns true for a missing resource.
    pub fn is_not_found(&self) -> bool {
        self.kind == RemoteErrorKind::NotFound || self.status == 404
    }
}
