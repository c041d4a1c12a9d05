//! Error types for driver operations.

use std::io;
use thiserror::Error;

/// Errors surfaced by the driver.
///
/// Server-side failures are *not* errors: a response with a non-2xx code is
/// delivered to the caller as a regular [`crate::Response`]. This enum only
/// covers failures of the driver machinery itself.
///
/// The type is `Clone` because a single connection failure fans out to every
/// request in flight on that connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// TCP connect, TLS handshake, read or write failed.
    #[error("transport error: {message}")]
    Transport {
        /// Details of the underlying I/O failure.
        message: String,
    },

    /// The connection was closed while the operation was in flight, or the
    /// operation was submitted to a connection that is shutting down.
    #[error("connection closed")]
    ConnectionClosed,

    /// The overall operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The peer violated the VelocyStream protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was malformed.
        message: String,
    },

    /// The server rejected the configured credentials.
    #[error("authentication failed (response code {code})")]
    Authentication {
        /// HTTP-style response code returned by the server (401 for bad
        /// credentials).
        code: u16,
    },

    /// The operation is not legal in the current state, e.g. initializing a
    /// connection twice or executing on a closed connection.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Which rule was violated.
        message: String,
    },
}

impl DriverError {
    /// Shorthand for a [`DriverError::Transport`] with the given message.
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        DriverError::Transport {
            message: message.into(),
        }
    }

    /// Shorthand for a [`DriverError::Protocol`] with the given message.
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        DriverError::Protocol {
            message: message.into(),
        }
    }

    /// Shorthand for a [`DriverError::InvalidState`] with the given message.
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        DriverError::InvalidState {
            message: message.into(),
        }
    }
}

impl From<io::Error> for DriverError {
    fn from(error: io::Error) -> Self {
        DriverError::Transport {
            message: error.to_string(),
        }
    }
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
