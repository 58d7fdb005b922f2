//! Error types for BMC exchanges
//!
//! The display text of these errors is what `--verbose` prints after a
//! host's `error` result.

use thiserror::Error;

/// Error type for BMC operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BmcError {
    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The exchange did not finish within the per-message timeout
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// BMC answered with an HTTP error status (>= 400)
    #[error("HTTP error status {0}")]
    HttpStatus(u16),

    /// Request failed for any other transport reason
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The transport itself could not be constructed
    #[error("transport initialization failed: {0}")]
    InitFailed(String),
}

impl BmcError {
    /// Classify a reqwest failure
    pub(crate) fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            BmcError::Timeout(err.to_string())
        } else if err.is_connect() {
            BmcError::ConnectionFailed(err.to_string())
        } else if let Some(status) = err.status() {
            BmcError::HttpStatus(status.as_u16())
        } else {
            BmcError::CommandFailed(err.to_string())
        }
    }
}

/// Result type for BMC operations
pub type Result<T> = std::result::Result<T, BmcError>;
