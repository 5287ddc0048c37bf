//! Error types for jobmatch.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using jobmatch's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for jobmatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed filters or request, rejected before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Pool or backend timed out; the caller may retry.
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Distributed cache tier rejected the call because its circuit is open.
    #[error("Circuit open: {0}")]
    CircuitOpen(String),

    /// Backend rejected the similarity query.
    #[error("Query error: {message}")]
    Query {
        message: String,
        /// Backend diagnostic code (SQLSTATE for PostgreSQL), when available.
        code: Option<String>,
    },

    /// Profile or exclusion retrieval failed.
    #[error("Upstream failure: {0}")]
    Upstream(String),

    /// No stored profile exists for the requester.
    #[error("Profile not found: {0}")]
    ProfileNotFound(Uuid),

    /// Task id was never issued (or belongs to another owner).
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    /// Task existed but has been reaped.
    #[error("Task expired: {0}")]
    TaskExpired(Uuid),

    /// Cache tier failure that could not be absorbed by the fallback.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serializable discriminant of [`Error`], recorded on failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ResourceUnavailable,
    CircuitOpen,
    Query,
    Upstream,
    ProfileNotFound,
    TaskNotFound,
    TaskExpired,
    Cache,
    Database,
    Serialization,
    Config,
    Internal,
}

impl Error {
    /// The error class, without its payload.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::ResourceUnavailable(_) => ErrorKind::ResourceUnavailable,
            Error::CircuitOpen(_) => ErrorKind::CircuitOpen,
            Error::Query { .. } => ErrorKind::Query,
            Error::Upstream(_) => ErrorKind::Upstream,
            Error::ProfileNotFound(_) => ErrorKind::ProfileNotFound,
            Error::TaskNotFound(_) => ErrorKind::TaskNotFound,
            Error::TaskExpired(_) => ErrorKind::TaskExpired,
            Error::Cache(_) => ErrorKind::Cache,
            Error::Database(_) => ErrorKind::Database,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Config(_) => ErrorKind::Config,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller can reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ResourceUnavailable(_) | Error::CircuitOpen(_))
    }

    /// Convenience constructor for validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
