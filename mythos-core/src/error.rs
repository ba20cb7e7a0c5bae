//! Error types for the engine.
//!
//! Each layer has its own enum; they convert upward with `#[from]`.

use crate::ids::SessionId;
use crate::path::PathError;

/// Errors raised by a [`WorldStore`](crate::store::WorldStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(#[from] PathError),

    #[error("Conflicting write: {0}")]
    Conflict(String),
}

/// Top-level error for a turn or a session setup.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The session does not exist in the store.
    #[error("Session not found: {0}")]
    NotFound(SessionId),

    /// The completion service could not be reached at a point where no
    /// fallback exists.
    #[error("Completion service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A completion returned something that could not be decoded at a point
    /// where no fallback exists.
    #[error("Malformed completion output: {0}")]
    MalformedUpstreamOutput(String),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Reserved: concurrent turns are currently last-write-wins.
    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Convenience alias used across the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
