//! Client error types.
//!
//! A single `ClientError` enum covers every failure the protocol engine can
//! report: transport-level socket errors, peer-reported rejections (bind,
//! set/command, service), local liveness timeouts, and envelope codec
//! failures. At most one error is active on a client at a time; clearing it
//! requires a full `stop()`/`start()` cycle.

use thiserror::Error;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors reported by the protocol engine.
///
/// `Socket` carries the transport's numeric code and text. The peer-reported
/// variants (`Bind`, `Command`, `Service`) carry the rejection note lines
/// joined with newlines. `Timeout` is a local liveness-detection failure and
/// has no peer payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport-level failure (connect, send, subscribe).
    #[error("Socket error {code}: {message}")]
    Socket {
        /// Numeric error code reported by the transport.
        code: i32,
        /// Human-readable description.
        message: String,
    },

    /// Peer rejected a bind request.
    #[error("Bind rejected: {0}")]
    Bind(String),

    /// Peer rejected a command or set request.
    #[error("Command rejected: {0}")]
    Command(String),

    /// Peer reported a generic service error.
    #[error("Service error: {0}")]
    Service(String),

    /// Local heartbeat timeout; the peer went silent.
    #[error("Connection timed out")]
    Timeout,

    /// Envelope encode/decode failure.
    #[error("Envelope codec error: {0}")]
    Codec(String),

    /// Invalid client configuration (bad endpoint URI, empty identity).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<crate::endpoint::EndpointError> for ClientError {
    fn from(err: crate::endpoint::EndpointError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<crate::transport::TransportError> for ClientError {
    fn from(err: crate::transport::TransportError) -> Self {
        Self::Socket {
            code: err.code,
            message: err.message,
        }
    }
}

impl ClientError {
    /// Returns the peer-supplied or generated error text.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Socket { code, message } => format!("Error {code}: {message}"),
            Self::Bind(s)
            | Self::Command(s)
            | Self::Service(s)
            | Self::Codec(s)
            | Self::InvalidConfig(s) => s.clone(),
            Self::Timeout => "timeout".to_string(),
        }
    }

    /// Returns `true` for errors that a resubscribe can heal without a
    /// full stop/start cycle.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Join peer note lines into a single newline-separated error string.
#[must_use]
pub fn join_notes(notes: &[String]) -> String {
    notes.join("\n")
}
