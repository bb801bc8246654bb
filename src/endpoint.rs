//! Socket endpoint validation and normalization.
//!
//! Command and status URIs arrive from configuration files or user input in a
//! handful of shapes. [`EndpointAddress::parse`] normalizes them before the
//! transport ever sees them:
//! - Bare `host:port` gets the default `tcp://` scheme
//! - Whitespace is trimmed
//! - Only `tcp`, `ipc` and `inproc` schemes are accepted
//! - `tcp` endpoints must carry an explicit port (services announce their
//!   ports at runtime, so there is no meaningful default)

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Validated socket endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddress {
    /// The normalized URI.
    uri: String,
    /// Original input string (for display/debugging).
    original: String,
}

impl EndpointAddress {
    /// Parse and normalize an endpoint URI.
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let normalized = normalize_uri(input)?;
        Ok(Self {
            uri: normalized,
            original: input.to_string(),
        })
    }

    /// Returns the normalized URI string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Returns the original input string before normalization.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Endpoint validation error with user-friendly messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Input was empty or whitespace-only.
    EmptyInput,
    /// URI parsing failed.
    InvalidUri(String),
    /// No host was found in a tcp URI.
    MissingHost,
    /// A tcp URI without an explicit port.
    MissingPort,
    /// Unsupported scheme (only tcp/ipc/inproc allowed).
    UnsupportedScheme(String),
}

impl std::error::Error for EndpointError {}

impl fmt::Display for EndpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyInput => write!(f, "Endpoint cannot be empty"),
            Self::InvalidUri(e) => write!(f, "Invalid URI: {e}"),
            Self::MissingHost => write!(f, "URI must include a host"),
            Self::MissingPort => write!(f, "tcp endpoints require an explicit port"),
            Self::UnsupportedScheme(s) => {
                write!(f, "Unsupported scheme '{s}' (use tcp, ipc or inproc)")
            }
        }
    }
}

/// Normalize an endpoint URI string.
///
/// Adds the `tcp://` scheme when missing and validates scheme, host and port.
/// Returns the normalized string rather than a `Url` because `inproc` and
/// `ipc` names round-trip poorly through full URL normalization.
pub fn normalize_uri(input: &str) -> Result<String, EndpointError> {
    let input = input.trim();

    if input.is_empty() {
        return Err(EndpointError::EmptyInput);
    }

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("tcp://{input}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| EndpointError::InvalidUri(e.to_string()))?;

    let scheme = url.scheme().to_lowercase();
    match scheme.as_str() {
        "tcp" => {
            if url.host().is_none() {
                return Err(EndpointError::MissingHost);
            }
            if url.port().is_none() {
                return Err(EndpointError::MissingPort);
            }
        }
        "ipc" | "inproc" => {}
        other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
    }

    Ok(with_scheme)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_port_gets_tcp_scheme() {
        let addr = EndpointAddress::parse("192.168.7.2:5550").unwrap();
        assert_eq!(addr.as_str(), "tcp://192.168.7.2:5550");
        assert_eq!(addr.original(), "192.168.7.2:5550");
    }

    #[test]
    fn test_explicit_tcp_scheme() {
        let addr = EndpointAddress::parse("tcp://machine.local:5551").unwrap();
        assert_eq!(addr.as_str(), "tcp://machine.local:5551");
    }

    #[test]
    fn test_trims_whitespace() {
        let addr = EndpointAddress::parse("  10.0.0.1:5550  ").unwrap();
        assert_eq!(addr.as_str(), "tcp://10.0.0.1:5550");
    }

    #[test]
    fn test_ipc_and_inproc_pass_through() {
        assert!(EndpointAddress::parse("ipc:///tmp/status.sock").is_ok());
        assert!(EndpointAddress::parse("inproc://status").is_ok());
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(
            EndpointAddress::parse("").unwrap_err(),
            EndpointError::EmptyInput
        );
        assert_eq!(
            EndpointAddress::parse("   ").unwrap_err(),
            EndpointError::EmptyInput
        );
    }

    #[test]
    fn test_tcp_requires_port() {
        assert_eq!(
            EndpointAddress::parse("tcp://machine.local").unwrap_err(),
            EndpointError::MissingPort
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(matches!(
            EndpointAddress::parse("http://machine.local:80").unwrap_err(),
            EndpointError::UnsupportedScheme(_)
        ));
    }
}
