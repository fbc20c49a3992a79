//! Error types for pool operations
use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to pool callers.
///
/// Invalid releases are not errors; the pool logs them and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A queued acquisition was not granted before its deadline.
    #[error(
        "Acquisition timed out after {waited_ms}ms: {active}/{max_resources} in use, {queued} still queued"
    )]
    AcquisitionTimeout {
        /// How long the request waited in the queue, in milliseconds
        waited_ms: u64,
        /// Active handles at the moment of expiry
        active: usize,
        /// Pool capacity at the moment of expiry
        max_resources: usize,
        /// Requests left in the queue after this one was removed
        queued: usize,
    },

    /// The pool was reset while the request was queued.
    #[error("Pool was reset while the acquisition was queued")]
    PoolReset,

    /// The pool has been shut down and admits no new acquisitions.
    #[error("Pool is shut down")]
    Shutdown,

    /// Pool configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AcquisitionTimeout { .. })
    }
}
