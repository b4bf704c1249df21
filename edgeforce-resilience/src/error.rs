use std::time::Duration;

/// Error returned by [`crate::circuit_breaker::CircuitBreaker::call`].
///
/// Wraps the inner operation's error so callers can still inspect it, while
/// distinguishing "the breaker refused to even try" from "the operation ran
/// and failed".
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{name}' is open, retry after {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    #[error(transparent)]
    Inner(#[from] E),
}

/// Errors surfaced by retry helpers once every attempt has been exhausted.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("operation failed after {attempts} attempt(s)")]
    Exhausted { attempts: u32, #[source] source: E },
}

/// Top-level error type shared across every `edgeforce-*` crate's fallible
/// operations that don't have a more specific local error enum.
#[derive(Debug, thiserror::Error)]
pub enum EdgeForceError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportErrorKind),

    #[error("circuit breaker '{0}' is open")]
    BreakerOpen(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("state lock not acquired within {0:?}")]
    LockTimeout(Duration),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EdgeForceError {
    /// HTTP status code this error kind maps to, per spec.md §6's
    /// "Status codes" table.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            EdgeForceError::Validation(_) => 400,
            EdgeForceError::Unauthorized(_) => 403,
            EdgeForceError::NotFound(_) => 404,
            EdgeForceError::Conflict(_) => 409,
            EdgeForceError::BreakerOpen(_) => 503,
            EdgeForceError::Transport(_) | EdgeForceError::Timeout(_) => 500,
            EdgeForceError::Config(_) | EdgeForceError::LockTimeout(_) | EdgeForceError::Internal(_) => 500,
        }
    }
}

/// The sub-kinds of transport failure a device manager can hit, shared by
/// the serial (Modbus) and SPI (CAN) backends.
#[derive(Debug, thiserror::Error)]
pub enum TransportErrorKind {
    #[error("device not connected")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("timed out waiting for a response")]
    Timeout,

    #[error("checksum/CRC mismatch")]
    BadChecksum,

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}
