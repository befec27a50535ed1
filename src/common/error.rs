//! Error types shared by the clip pipeline and its adapters.

use std::time::Duration;

use thiserror::Error;

pub type ClipResult<T> = Result<T, ClipError>;

/// Coarse classification used to turn a failure into a queue disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Input that will never succeed on retry.
    MalformedInput,
    /// Storage, network or tool availability problem; retry later.
    TransientIo,
    /// Benign conflict, e.g. the object was already written by an earlier attempt.
    ResourceConflict,
    /// A bounded call ran out of time. Handled like `TransientIo`.
    Timeout,
    /// Unrecoverable at process level.
    Fatal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientIo | ErrorKind::Timeout)
    }
}

#[derive(Debug, Error)]
pub enum ClipError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Trim rejected: {0}")]
    TrimRejected(String),

    #[error("Trim tool unavailable: {0}")]
    TrimUnavailable(String),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClipError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientIo(msg.into())
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn already_exists(key: impl Into<String>) -> Self {
        Self::AlreadyExists(key.into())
    }

    /// Map the error onto the retry taxonomy. A missing object is retried.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClipError::MalformedInput(_) | ClipError::Json(_) | ClipError::TrimRejected(_) => {
                ErrorKind::MalformedInput
            }
            ClipError::AlreadyExists(_) => ErrorKind::ResourceConflict,
            ClipError::Timeout(_) => ErrorKind::Timeout,
            ClipError::Fatal(_) => ErrorKind::Fatal,
            ClipError::NotFound(_)
            | ClipError::TransientIo(_)
            | ClipError::Cancelled
            | ClipError::TrimUnavailable(_)
            | ClipError::Io(_)
            | ClipError::Redis(_) => ErrorKind::TransientIo,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClipError::Cancelled)
    }
}
