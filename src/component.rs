//! Bound remote component.
//!
//! Unlike the simple clients, a remote component must negotiate before any
//! data flows: the peer has to accept the component's declared interface
//! (the bind payload) before the data channel is opened. The lifecycle is
//! the eight-state bind/sync machine:
//!
//! ```text
//! Down → Trying → Bind → Binding → Syncing → Sync → Synced
//! ```
//!
//! with `Error` reachable from rejection or channel failure. Regressions
//! stay local: a peer channel reported trying unwinds to the matching
//! earlier state (Synced → Syncing on data loss, → Trying on command loss),
//! never to Down. Only an explicit [`stop`](RemoteComponent::stop) or a
//! terminal rejection leaves the retry loop.
//!
//! Events delivered in a state that does not handle them are dropped; a
//! handler re-checks the current state after any call that may have failed
//! sideways, so a teardown triggered mid-transition wins.

use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::config::ComponentConfig;
use crate::endpoint::EndpointAddress;
use crate::envelope::{Envelope, MessageType};
use crate::error::{ClientError, Result};
use crate::fsm::{ChannelHealth, ComponentState, Machine};
use crate::heartbeat::{HeartbeatMode, HeartbeatMonitor};
use crate::status::merge_delta;
use crate::transport::Transport;

/// Remote component with a bind handshake over command plus data sockets.
pub struct RemoteComponent<T: Transport> {
    command_uri: EndpointAddress,
    data_uri: EndpointAddress,
    name: String,
    heartbeat_interval: Duration,
    command: T,
    data: T,
    machine: Machine<ComponentState>,
    command_health: ChannelHealth,
    data_health: ChannelHealth,
    command_heartbeat: HeartbeatMonitor,
    data_heartbeat: HeartbeatMonitor,
    connected: bool,
    error: Option<ClientError>,
    bind_payload: Option<String>,
    subscribed: bool,
    items: Value,
    items_are_synced: bool,
    timed_out: bool,
}

impl<T: Transport> RemoteComponent<T> {
    /// Creates a component in Down. Fails on invalid URIs or an empty name.
    pub fn new(config: ComponentConfig, command: T, data: T) -> Result<Self> {
        let (command_uri, data_uri) = config.validated_uris()?;
        Ok(Self {
            command_uri,
            data_uri,
            name: config.name,
            heartbeat_interval: config.heartbeat_interval,
            command,
            data,
            machine: Machine::new(ComponentState::Down),
            command_health: ChannelHealth::Down,
            data_health: ChannelHealth::Down,
            command_heartbeat: HeartbeatMonitor::new(HeartbeatMode::Probe),
            data_heartbeat: HeartbeatMonitor::new(HeartbeatMode::Listen),
            connected: false,
            error: None,
            bind_payload: None,
            subscribed: false,
            items: Value::Object(Map::new()),
            items_are_synced: false,
            timed_out: false,
        })
    }

    /// Declares the interface description sent with the bind request. When
    /// none is set the handshake skips straight from Bind to Syncing.
    /// Must be called before [`start`](Self::start).
    pub fn set_bind_payload(&mut self, payload: impl Into<String>) {
        self.bind_payload = Some(payload.into());
    }

    /// Connect event: opens the command channel and starts probing. No-op
    /// unless Down.
    pub fn start(&mut self, now: Instant) {
        if !self.machine.is(ComponentState::Down) {
            return;
        }
        tracing::info!(name = %self.name, command = %self.command_uri, "component starting");
        self.transition(ComponentState::Trying);

        if let Err(e) = self.command.connect(self.command_uri.as_str()) {
            self.fail(e.into());
            return;
        }
        self.command_health = ChannelHealth::Trying;
        self.command_heartbeat.start(self.heartbeat_interval, now);
        self.send_envelope(Envelope::new(MessageType::Ping));
    }

    /// Disconnect event: closes both channels, drops items and returns to
    /// Down from any state. No-op if already Down.
    pub fn stop(&mut self) {
        if self.machine.is(ComponentState::Down) {
            return;
        }
        tracing::info!(name = %self.name, "component stopping");
        self.close_data_channel();
        self.close_command_channel();
        self.transition(ComponentState::Down);
    }

    /// Feeds one inbound command-channel frame into the component.
    pub fn handle_command_message(&mut self, bytes: &[u8]) {
        // Frames still queued in the host loop when the component was
        // stopped must not resurrect it.
        if self.machine.is(ComponentState::Down) {
            return;
        }
        let rx = match Envelope::decode(bytes) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable command frame");
                return;
            }
        };

        match rx.msg_type {
            MessageType::PingAcknowledge => {
                self.command_heartbeat.acknowledge();
                self.command_health = ChannelHealth::Up;
                self.on_command_up();
            }
            MessageType::BindConfirm => self.on_bind_confirmed(),
            MessageType::BindReject => self.on_bind_rejected(&rx),
            MessageType::SetReject => self.on_set_rejected(&rx),
            MessageType::Error => self.on_sync_failed(&rx),
            other => {
                tracing::debug!(msg_type = ?other, "unexpected message on command socket");
            }
        }
    }

    /// Feeds one inbound data-channel envelope (the topic frame already
    /// stripped by the host).
    pub fn handle_data_message(&mut self, bytes: &[u8], now: Instant) {
        if self.machine.is(ComponentState::Down) {
            return;
        }
        let rx = match Envelope::decode(bytes) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable data frame");
                return;
            }
        };

        match rx.msg_type {
            MessageType::FullUpdate => {
                self.apply_items(rx.payload.as_deref(), true);
                if let Some(pparams) = rx.pparams {
                    let timeout = Duration::from_millis(pparams.keepalive_timer_ms * 2);
                    self.data_heartbeat.start(timeout, now);
                }
                self.data_health = ChannelHealth::Up;
                self.on_data_up();
                self.items_synced();
            }
            MessageType::IncrementalUpdate => {
                self.apply_items(rx.payload.as_deref(), false);
                self.data_heartbeat.refresh(now);
            }
            MessageType::Ping => {
                if self.data_health == ChannelHealth::Up {
                    self.data_heartbeat.refresh(now);
                }
            }
            MessageType::Error => self.on_sync_failed(&rx),
            other => {
                tracing::debug!(msg_type = ?other, "unexpected message on data socket");
            }
        }
    }

    /// Reports a transport failure observed by the host loop.
    pub fn transport_error(&mut self, code: i32, message: &str) {
        if self.machine.is(ComponentState::Down) {
            return;
        }
        self.fail(ClientError::Socket {
            code,
            message: message.to_string(),
        });
    }

    /// Drives both liveness timers.
    pub fn poll_heartbeats(&mut self, now: Instant) {
        if self.command_heartbeat.due(now) {
            let tick = self.command_heartbeat.tick(now);
            if tick.timed_out {
                tracing::warn!(name = %self.name, "component command channel timeout");
                self.command_health = ChannelHealth::Trying;
                self.on_command_trying();
            }
            if tick.send_probe {
                self.send_envelope(Envelope::new(MessageType::Ping));
            }
        }

        if self.data_heartbeat.due(now) {
            let tick = self.data_heartbeat.tick(now);
            if tick.timed_out {
                tracing::warn!(name = %self.name, "component data channel timeout");
                self.on_data_trying();
            }
        }
    }

    /// Local items finished applying a full snapshot. No-op unless in Sync.
    pub fn items_synced(&mut self) {
        if !self.machine.is(ComponentState::Sync) {
            return;
        }
        self.items_are_synced = true;
        self.transition(ComponentState::Synced);
    }

    /// Sends a set request with the given JSON payload. Silent no-op unless
    /// fully synced.
    pub fn send_set(&mut self, payload: &str) {
        if !self.machine.is(ComponentState::Synced) {
            tracing::debug!(name = %self.name, "dropping set while not synced");
            return;
        }
        self.send_envelope(Envelope::new(MessageType::Set).with_payload(payload));
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ComponentState {
        self.machine.state()
    }

    /// True only while fully bound and synchronized.
    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// True only while Synced with items applied.
    #[must_use]
    pub fn synced(&self) -> bool {
        self.items_are_synced
    }

    /// Armed when a channel regression unwound the component; cleared on
    /// the next entry to Synced.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.timed_out
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

    /// Remote item snapshot.
    #[must_use]
    pub fn items(&self) -> &Value {
        &self.items
    }

    /// Earliest heartbeat deadline for host-loop scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (
            self.command_heartbeat.next_deadline(),
            self.data_heartbeat.next_deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// The command-channel transport, for host-loop socket plumbing.
    #[must_use]
    pub fn command_transport(&self) -> &T {
        &self.command
    }

    /// The data-channel transport.
    #[must_use]
    pub fn data_transport(&self) -> &T {
        &self.data
    }

    fn on_command_up(&mut self) {
        if !self.machine.is(ComponentState::Trying) {
            return;
        }
        self.transition(ComponentState::Bind);

        match self.bind_payload.clone() {
            Some(payload) => {
                self.send_envelope(Envelope::new(MessageType::Bind).with_payload(payload));
                // A failed send already tore the handshake down.
                if self.machine.is(ComponentState::Bind) {
                    self.transition(ComponentState::Binding);
                }
            }
            None => {
                self.open_data_channel();
                if self.machine.is(ComponentState::Bind) {
                    self.transition(ComponentState::Syncing);
                }
            }
        }
    }

    fn on_bind_confirmed(&mut self) {
        if !self.machine.is(ComponentState::Binding) {
            return;
        }
        self.open_data_channel();
        if self.machine.is(ComponentState::Binding) {
            self.transition(ComponentState::Syncing);
        }
    }

    fn on_bind_rejected(&mut self, rx: &Envelope) {
        // Terminal rejection is only meaningful while the request is
        // outstanding.
        if !self.machine.is(ComponentState::Binding) {
            return;
        }
        self.close_command_channel();
        self.error = Some(ClientError::Bind(rx.joined_notes()));
        self.transition(ComponentState::Error);
    }

    fn on_set_rejected(&mut self, rx: &Envelope) {
        if !self.machine.is(ComponentState::Synced) {
            return;
        }
        self.close_data_channel();
        self.close_command_channel();
        self.error = Some(ClientError::Command(rx.joined_notes()));
        self.transition(ComponentState::Error);
    }

    fn on_sync_failed(&mut self, rx: &Envelope) {
        if !matches!(
            self.machine.state(),
            ComponentState::Syncing | ComponentState::Sync | ComponentState::Synced
        ) {
            return;
        }
        self.close_data_channel();
        self.close_command_channel();
        self.error = Some(ClientError::Service(rx.joined_notes()));
        self.transition(ComponentState::Error);
    }

    fn on_data_up(&mut self) {
        if !self.machine.is(ComponentState::Syncing) {
            return;
        }
        self.transition(ComponentState::Sync);
    }

    fn on_command_trying(&mut self) {
        match self.machine.state() {
            ComponentState::Binding => self.transition(ComponentState::Trying),
            ComponentState::Syncing | ComponentState::Sync => {
                self.close_data_channel();
                self.transition(ComponentState::Trying);
            }
            ComponentState::Synced => {
                self.close_data_channel();
                self.unsync_items();
                self.timed_out = true;
                self.transition(ComponentState::Trying);
            }
            _ => {}
        }
    }

    fn on_data_trying(&mut self) {
        if !self.machine.is(ComponentState::Synced) {
            return;
        }
        self.data_health = ChannelHealth::Trying;
        self.unsync_items();
        self.timed_out = true;
        self.transition(ComponentState::Syncing);
    }

    fn open_data_channel(&mut self) {
        if let Err(e) = self.data.connect(self.data_uri.as_str()) {
            self.fail(e.into());
            return;
        }
        if let Err(e) = self.data.subscribe(&self.name) {
            self.fail(e.into());
            return;
        }
        self.subscribed = true;
        self.data_health = ChannelHealth::Trying;
    }

    fn close_data_channel(&mut self) {
        if self.subscribed {
            if let Err(e) = self.data.unsubscribe(&self.name) {
                tracing::warn!(error = %e, "unsubscribe failed");
            }
            self.subscribed = false;
        }
        self.data_heartbeat.stop();
        self.data.close();
        self.data_health = ChannelHealth::Down;
    }

    fn close_command_channel(&mut self) {
        self.command_heartbeat.stop();
        self.command.close();
        self.command_health = ChannelHealth::Down;
    }

    fn unsync_items(&mut self) {
        self.items_are_synced = false;
    }

    fn apply_items(&mut self, payload: Option<&str>, full: bool) {
        let Some(text) = payload else { return };
        match serde_json::from_str::<Value>(text) {
            Ok(value) if full => self.items = value,
            Ok(value) => merge_delta(&mut self.items, value),
            Err(e) => tracing::warn!(error = %e, "bad item payload"),
        }
    }

    fn send_envelope(&mut self, mut tx: Envelope) {
        tx.identity = Some(self.name.clone());
        let bytes = match tx.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        if let Err(e) = self.command.send(vec![bytes]) {
            self.fail(e.into());
        }
    }

    fn fail(&mut self, error: ClientError) {
        tracing::error!(name = %self.name, %error, "component error");
        self.close_data_channel();
        self.close_command_channel();
        self.error = Some(error);
        self.transition(ComponentState::Error);
    }

    fn transition(&mut self, next: ComponentState) {
        if self.machine.is(next) {
            return;
        }
        let old = self.machine.state();
        self.state_exit(old);
        self.machine.advance(next);
        self.state_enter(next);
    }

    fn state_exit(&mut self, old: ComponentState) {
        if old == ComponentState::Synced {
            self.connected = false;
        }
    }

    fn state_enter(&mut self, new: ComponentState) {
        match new {
            ComponentState::Synced => {
                self.connected = true;
                self.timed_out = false;
            }
            ComponentState::Down => {
                self.error = None;
                self.items = Value::Object(Map::new());
                self.items_are_synced = false;
                self.timed_out = false;
            }
            _ => {}
        }
    }
}
