//! Configuration browser client.
//!
//! Talks to the peer's config service over a single command channel: lists
//! the published applications, and retrieves one application's files on
//! demand. The application list is requested automatically on entry to
//! Connected.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::config::ConfigBrowserConfig;
use crate::endpoint::EndpointAddress;
use crate::envelope::{Envelope, MessageType};
use crate::error::{ClientError, Result};
use crate::fsm::{ChannelHealth, ConnectionState, Machine};
use crate::heartbeat::{HeartbeatMode, HeartbeatMonitor};
use crate::transport::Transport;

/// Config service client over one command socket.
pub struct ConfigClient<T: Transport> {
    uri: EndpointAddress,
    identity: String,
    heartbeat_interval: Duration,
    transport: T,
    machine: Machine<ConnectionState>,
    health: ChannelHealth,
    heartbeat: HeartbeatMonitor,
    connected: bool,
    error: Option<ClientError>,
    applications: Vec<Value>,
    detail: Option<Value>,
    synced: bool,
}

impl<T: Transport> ConfigClient<T> {
    /// Creates a stopped config client. Fails on an invalid URI or an empty
    /// identity.
    pub fn new(config: ConfigBrowserConfig, transport: T) -> Result<Self> {
        let uri = config.validated_uri()?;
        Ok(Self {
            uri,
            identity: config.identity,
            heartbeat_interval: config.heartbeat_interval,
            transport,
            machine: Machine::new(ConnectionState::Disconnected),
            health: ChannelHealth::Down,
            heartbeat: HeartbeatMonitor::new(HeartbeatMode::Probe),
            connected: false,
            error: None,
            applications: Vec::new(),
            detail: None,
            synced: false,
        })
    }

    /// Opens the socket and sends the first liveness probe. No-op unless
    /// currently disconnected.
    pub fn start(&mut self, now: Instant) {
        if !self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        tracing::info!(uri = %self.uri, "config client starting");
        self.update_state(ConnectionState::Connecting);

        if let Err(e) = self.transport.connect(self.uri.as_str()) {
            self.fail(e.into());
            return;
        }
        self.health = ChannelHealth::Trying;
        self.heartbeat.start(self.heartbeat_interval, now);
        self.send_envelope(Envelope::new(MessageType::Ping));
    }

    /// Tears down and returns to Disconnected, clearing any error. No-op if
    /// already disconnected.
    pub fn stop(&mut self) {
        if self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        tracing::info!("config client stopping");
        self.cleanup();
        self.update_state(ConnectionState::Disconnected);
    }

    /// Feeds one inbound command-channel frame into the client.
    pub fn handle_message(&mut self, bytes: &[u8]) {
        // Frames still queued in the host loop when the client was stopped
        // must not resurrect it (or send on the closed transport).
        if self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        let rx = match Envelope::decode(bytes) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable config frame");
                return;
            }
        };

        match rx.msg_type {
            MessageType::PingAcknowledge => {
                self.heartbeat.acknowledge();
                if self.health != ChannelHealth::Up {
                    self.health = ChannelHealth::Up;
                    self.update_state(ConnectionState::Connected);
                }
            }
            MessageType::DescribeApplication => self.handle_describe(&rx),
            MessageType::ApplicationDetail => self.handle_detail(&rx),
            MessageType::Error => {
                self.health = ChannelHealth::Down;
                self.fail(ClientError::Service(rx.joined_notes()));
            }
            other => {
                tracing::debug!(msg_type = ?other, "unexpected message on config socket");
            }
        }
    }

    /// Reports a transport failure observed by the host loop.
    pub fn transport_error(&mut self, code: i32, message: &str) {
        if self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        self.fail(ClientError::Socket {
            code,
            message: message.to_string(),
        });
    }

    /// Drives the liveness timer.
    pub fn poll_heartbeat(&mut self, now: Instant) {
        if !self.heartbeat.due(now) {
            return;
        }
        let tick = self.heartbeat.tick(now);
        if tick.timed_out {
            tracing::warn!("config channel timeout");
            self.health = ChannelHealth::Trying;
            self.update_state(ConnectionState::Timeout);
        }
        if tick.send_probe {
            self.send_envelope(Envelope::new(MessageType::Ping));
        }
    }

    /// Requests a fresh application list. Silent no-op unless connected.
    pub fn list_applications(&mut self) {
        if !self.connected {
            tracing::debug!("dropping list request while not connected");
            return;
        }
        self.applications.clear();
        self.synced = false;
        self.send_envelope(Envelope::new(MessageType::ListApplications));
    }

    /// Requests the files of the named application. Silent no-op unless
    /// connected.
    pub fn retrieve_application(&mut self, name: &str) {
        if !self.connected {
            tracing::debug!(%name, "dropping retrieve request while not connected");
            return;
        }
        let mut tx = Envelope::new(MessageType::RetrieveApplication);
        tx.name = Some(name.to_string());
        self.send_envelope(tx);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    /// Debounced view of the state: true only while Connected.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// True once the peer described at least one application.
    #[must_use]
    pub fn synced(&self) -> bool {
        self.synced
    }

    /// Active error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ClientError> {
        self.error.as_ref()
    }

    /// Active error text; empty when healthy.
    #[must_use]
    pub fn error_string(&self) -> String {
        self.error.as_ref().map(ClientError::message).unwrap_or_default()
    }

    /// Applications described by the peer so far.
    #[must_use]
    pub fn applications(&self) -> &[Value] {
        &self.applications
    }

    /// Files of the most recently retrieved application.
    #[must_use]
    pub fn application_detail(&self) -> Option<&Value> {
        self.detail.as_ref()
    }

    /// Next heartbeat deadline for host-loop scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heartbeat.next_deadline()
    }

    /// The underlying transport, for host-loop socket plumbing.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn handle_describe(&mut self, rx: &Envelope) {
        let Some(text) = rx.payload.as_deref() else {
            return;
        };
        let app: Value = match serde_json::from_str(text) {
            Ok(app) => app,
            Err(e) => {
                tracing::warn!(error = %e, "bad application description");
                return;
            }
        };

        // Re-described applications replace their previous entry.
        let name = app.get("name").and_then(Value::as_str).map(str::to_owned);
        match name.and_then(|n| {
            self.applications
                .iter()
                .position(|a| a.get("name").and_then(Value::as_str) == Some(n.as_str()))
        }) {
            Some(pos) => self.applications[pos] = app,
            None => self.applications.push(app),
        }
        self.synced = true;
    }

    fn handle_detail(&mut self, rx: &Envelope) {
        let Some(text) = rx.payload.as_deref() else {
            return;
        };
        match serde_json::from_str(text) {
            Ok(detail) => self.detail = Some(detail),
            Err(e) => tracing::warn!(error = %e, "bad application detail"),
        }
    }

    fn send_envelope(&mut self, mut tx: Envelope) {
        tx.identity = Some(self.identity.clone());
        let bytes = match tx.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        if let Err(e) = self.transport.send(vec![bytes]) {
            self.fail(e.into());
        }
    }

    fn cleanup(&mut self) {
        self.heartbeat.stop();
        self.transport.close();
        self.health = ChannelHealth::Down;
    }

    fn fail(&mut self, error: ClientError) {
        tracing::error!(%error, "config client error");
        self.cleanup();
        self.error = Some(error);
        self.update_state(ConnectionState::Error);
    }

    fn update_state(&mut self, next: ConnectionState) {
        if self.machine.is(next) {
            return;
        }
        let old = self.machine.state();
        self.state_exit(old);
        self.machine.advance(next);
        self.state_enter(next);
    }

    fn state_exit(&mut self, _old: ConnectionState) {
        if self.connected {
            self.synced = false;
            self.connected = false;
        }
    }

    fn state_enter(&mut self, new: ConnectionState) {
        match new {
            ConnectionState::Connected => {
                self.connected = true;
                // The freshly connected peer's catalog is the first thing a
                // browser needs.
                self.applications.clear();
                self.send_envelope(Envelope::new(MessageType::ListApplications));
            }
            ConnectionState::Disconnected | ConnectionState::Error => {
                if new == ConnectionState::Disconnected {
                    self.error = None;
                }
                self.applications.clear();
                self.detail = None;
            }
            _ => {}
        }
    }
}
