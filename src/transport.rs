//! Transport contract and a recording test double.
//!
//! The engine never touches sockets directly: each façade drives one or two
//! [`Transport`] objects and the host loop pushes inbound frames back into
//! the façade's `handle_*` methods. Real implementations wrap whatever socket
//! library the host embeds; [`RecordingTransport`] stands in for tests and
//! examples, recording every call and optionally failing the next one.

use std::fmt;

/// Transport-level failure with a numeric code and description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    /// Numeric error code from the underlying socket library.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl TransportError {
    /// Creates a transport error.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for TransportError {}

/// Socket primitives the engine depends on.
///
/// Implementations are expected to be non-blocking from the event loop's
/// perspective; inbound traffic is delivered by the host, not pulled here.
pub trait Transport {
    /// Connects the socket to a validated endpoint URI.
    fn connect(&mut self, uri: &str) -> Result<(), TransportError>;

    /// Sends one message as a sequence of frames.
    fn send(&mut self, frames: Vec<Vec<u8>>) -> Result<(), TransportError>;

    /// Subscribes to a topic (subscribe sockets only).
    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Unsubscribes from a topic.
    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Closes the socket. Infallible; teardown must always succeed locally.
    fn close(&mut self);
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    /// `connect(uri)` was called.
    Connect(String),
    /// `send(frames)` was called.
    Send(Vec<Vec<u8>>),
    /// `subscribe(topic)` was called.
    Subscribe(String),
    /// `unsubscribe(topic)` was called.
    Unsubscribe(String),
    /// `close()` was called.
    Close,
}

/// In-memory transport that records calls for assertions.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// Every call made against this transport, in order.
    pub actions: Vec<TransportAction>,
    /// When set, the next fallible call returns this error.
    pub fail_next: Option<TransportError>,
}

impl RecordingTransport {
    /// Creates an empty recording transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames of every `send` call, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<&Vec<Vec<u8>>> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                TransportAction::Send(frames) => Some(frames),
                _ => None,
            })
            .collect()
    }

    /// Topics currently subscribed (subscribes minus unsubscribes, in order).
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = Vec::new();
        for action in &self.actions {
            match action {
                TransportAction::Subscribe(t) => topics.push(t.clone()),
                TransportAction::Unsubscribe(t) => {
                    if let Some(pos) = topics.iter().position(|x| x == t) {
                        topics.remove(pos);
                    }
                }
                _ => {}
            }
        }
        topics
    }

    fn take_failure(&mut self) -> Result<(), TransportError> {
        match self.fail_next.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Transport for RecordingTransport {
    fn connect(&mut self, uri: &str) -> Result<(), TransportError> {
        self.actions.push(TransportAction::Connect(uri.to_string()));
        self.take_failure()
    }

    fn send(&mut self, frames: Vec<Vec<u8>>) -> Result<(), TransportError> {
        self.actions.push(TransportAction::Send(frames));
        self.take_failure()
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.actions
            .push(TransportAction::Subscribe(topic.to_string()));
        self.take_failure()
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.actions
            .push(TransportAction::Unsubscribe(topic.to_string()));
        self.take_failure()
    }

    fn close(&mut self) {
        self.actions.push(TransportAction::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_calls_in_order() {
        let mut t = RecordingTransport::new();
        t.connect("tcp://10.0.0.1:5550").unwrap();
        t.subscribe("motion").unwrap();
        t.unsubscribe("motion").unwrap();
        t.close();

        assert_eq!(
            t.actions,
            vec![
                TransportAction::Connect("tcp://10.0.0.1:5550".into()),
                TransportAction::Subscribe("motion".into()),
                TransportAction::Unsubscribe("motion".into()),
                TransportAction::Close,
            ]
        );
        assert!(t.subscriptions().is_empty());
    }

    #[test]
    fn test_fail_next_fires_once() {
        let mut t = RecordingTransport::new();
        t.fail_next = Some(TransportError::new(61, "connection refused"));
        assert!(t.connect("tcp://10.0.0.1:5550").is_err());
        assert!(t.connect("tcp://10.0.0.1:5550").is_ok());
    }
}
