//! Backend error taxonomy (spec §7).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    /// Requested hash or document absent; non-fatal, returned to caller.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network/timeout/bucket-temporarily-inaccessible; caller retries.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Sidecar present but payload missing, or hash mismatch on read.
    #[error("corrupt: {0}")]
    Corrupt(String),

    /// Startup capability validation failed; process exits.
    #[error("missing capability: {0}")]
    MissingCapability(String),

    /// Unreadable or malformed configuration; startup failure.
    #[error("config error: {0}")]
    Config(String),

    /// This backend does not implement the requested operation.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Unexpected driver-level failure; mapped to `Transient` at the
    /// dispatcher boundary (spec §7).
    #[error("internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// §7 policy: `Internal` is mapped to `Transient` at the boundary the
    /// caller sees (the dispatcher), since from the client's perspective an
    /// unexpected driver failure is exactly as retryable as a network blip.
    pub fn into_client_facing(self) -> BackendError {
        match self {
            BackendError::Internal(msg) => BackendError::Transient(msg),
            other => other,
        }
    }
}
