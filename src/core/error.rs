//! Error types for engine operations.

use thiserror::Error;

/// Errors produced by engine components and their backends.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Switch queue backend failure.
    #[error("queue error: {0}")]
    Queue(String),
    /// Queue rejected a push because it is at its maximum depth.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// Key/value store failure.
    #[error("store error: {0}")]
    Store(String),
    /// Relational repository failure.
    #[error("repository error: {0}")]
    Repository(String),
    /// Conditional write lost too many races.
    #[error("write conflict on `{0}`")]
    Conflict(String),
    /// Payload could not be decoded.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// Caller supplied an invalid request.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// Application-facing result using anyhow for loop bodies and wiring code.
pub type AppResult<T> = Result<T, anyhow::Error>;
