//! Status monitor client.
//!
//! Subscribes to the five status topic channels of a remote machine process
//! and reconciles their full/incremental update streams into per-channel JSON
//! snapshots plus the aggregate `synced` flag. The subscribe socket carries
//! no outbound traffic; liveness relies on the peer's periodic publishes,
//! monitored in [`HeartbeatMode::Listen`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::channel_sync::{StatusChannel, SyncTracker};
use crate::config::StatusConfig;
use crate::endpoint::EndpointAddress;
use crate::envelope::{Envelope, MessageType};
use crate::error::{ClientError, Result};
use crate::fsm::{ChannelHealth, ConnectionState, Machine};
use crate::heartbeat::{HeartbeatMode, HeartbeatMonitor};
use crate::transport::Transport;

/// Task mode values that count as program execution.
const TASK_MODE_AUTO: f64 = 2.0;
const TASK_MODE_MDI: f64 = 3.0;
/// Interpreter idle state value.
const INTERP_STATE_IDLE: f64 = 1.0;

/// Status monitor client over a subscribe socket.
pub struct StatusClient<T: Transport> {
    uri: EndpointAddress,
    transport: T,
    machine: Machine<ConnectionState>,
    socket_health: ChannelHealth,
    sync: SyncTracker,
    heartbeat: HeartbeatMonitor,
    connected: bool,
    error: Option<ClientError>,
    subscriptions: Vec<StatusChannel>,
    snapshots: HashMap<StatusChannel, Value>,
    running: bool,
}

impl<T: Transport> StatusClient<T> {
    /// Creates a stopped status client. Fails on an invalid status URI.
    pub fn new(config: StatusConfig, transport: T) -> Result<Self> {
        let uri = config.validated_uri()?;
        let mut client = Self {
            uri,
            transport,
            machine: Machine::new(ConnectionState::Disconnected),
            socket_health: ChannelHealth::Down,
            sync: SyncTracker::new(config.channels),
            heartbeat: HeartbeatMonitor::new(HeartbeatMode::Listen),
            connected: false,
            error: None,
            subscriptions: Vec::new(),
            snapshots: HashMap::new(),
            running: false,
        };
        client.reset_snapshots();
        Ok(client)
    }

    /// Opens the transport and subscribes all configured channels.
    /// No-op unless currently disconnected.
    pub fn start(&mut self) {
        if !self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        tracing::info!(uri = %self.uri, "status client starting");
        self.update_state(ConnectionState::Connecting);

        if let Err(e) = self.transport.connect(self.uri.as_str()) {
            self.fail(e.into());
            return;
        }
        self.subscribe_all();
    }

    /// Tears everything down and returns to Disconnected, clearing any
    /// error. No-op if already disconnected.
    pub fn stop(&mut self) {
        if self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        tracing::info!("status client stopping");
        self.cleanup();
        self.update_state(ConnectionState::Disconnected);
    }

    /// Feeds one inbound `[topic, envelope]` message into the client.
    pub fn handle_message(&mut self, topic: &str, bytes: &[u8], now: Instant) {
        // Frames still queued in the host loop when the client was stopped
        // must not resurrect it.
        if self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        let rx = match Envelope::decode(bytes) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(%topic, error = %e, "dropping undecodable status frame");
                return;
            }
        };

        match rx.msg_type {
            MessageType::FullUpdate | MessageType::IncrementalUpdate => {
                self.handle_update(topic, &rx, now);
            }
            MessageType::Ping => self.handle_ping(now),
            MessageType::Error => {
                self.socket_health = ChannelHealth::Down;
                self.fail(ClientError::Service(rx.joined_notes()));
            }
            other => {
                tracing::debug!(msg_type = ?other, "unexpected message on status socket");
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

    /// Drives the liveness timer; call whenever the loop wakes up.
    pub fn poll_heartbeat(&mut self, now: Instant) {
        if !self.heartbeat.due(now) {
            return;
        }
        let tick = self.heartbeat.tick(now);
        if tick.timed_out {
            tracing::warn!("status channel timeout");
            self.socket_health = ChannelHealth::Down;
            self.update_state(ConnectionState::Timeout);
        }
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

    /// True once every configured channel delivered a full update.
    #[must_use]
    pub fn synced(&self) -> bool {
        self.sync.is_synced()
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

    /// Whether a program is executing, derived from task and interp state.
    #[must_use]
    pub fn running(&self) -> bool {
        self.running
    }

    /// Domain snapshot of one channel.
    #[must_use]
    pub fn snapshot(&self, channel: StatusChannel) -> Option<&Value> {
        self.snapshots.get(&channel)
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

    fn handle_update(&mut self, topic: &str, rx: &Envelope, now: Instant) {
        let full = rx.msg_type == MessageType::FullUpdate;

        if let Some(channel) = StatusChannel::from_topic(topic) {
            if self.sync.expected().contains(channel) {
                self.apply_payload(channel, rx.payload.as_deref(), full);
                // Only a full snapshot is authoritative for sync.
                if full && self.sync.mark_synced(channel) {
                    tracing::info!("all status channels synced");
                }
                if channel.intersects(StatusChannel::TASK | StatusChannel::INTERP) {
                    self.update_running();
                }
            }
        }

        if full {
            if self.socket_health != ChannelHealth::Up {
                self.socket_health = ChannelHealth::Up;
                self.update_state(ConnectionState::Connected);
            }
            if let Some(pparams) = rx.pparams {
                // Receive-side timeout: double the peer's declared period.
                let timeout = Duration::from_millis(pparams.keepalive_timer_ms * 2);
                self.heartbeat.start(timeout, now);
            }
        } else {
            self.heartbeat.refresh(now);
        }
    }

    fn handle_ping(&mut self, now: Instant) {
        if self.socket_health == ChannelHealth::Up {
            self.heartbeat.refresh(now);
        } else {
            // The peer probes while we have no fresh snapshot: resubscribe
            // to force a new full update.
            tracing::debug!("peer ping while not synced, resubscribing");
            self.update_state(ConnectionState::Connecting);
            self.unsubscribe_all();
            self.subscribe_all();
        }
    }

    fn subscribe_all(&mut self) {
        self.socket_health = ChannelHealth::Trying;
        for channel in self.sync.expected().channels() {
            if let Err(e) = self.transport.subscribe(channel.topic()) {
                self.fail(e.into());
                return;
            }
            self.subscriptions.push(channel);
        }
    }

    fn unsubscribe_all(&mut self) {
        self.socket_health = ChannelHealth::Down;
        for channel in std::mem::take(&mut self.subscriptions) {
            if let Err(e) = self.transport.unsubscribe(channel.topic()) {
                tracing::warn!(topic = channel.topic(), error = %e, "unsubscribe failed");
            }
            self.reset_snapshot(channel);
        }
        self.sync.clear();
    }

    fn cleanup(&mut self) {
        // All subscriptions are dropped even when the connection never came
        // up; subscribing starts in Connecting.
        if !self.subscriptions.is_empty() {
            self.unsubscribe_all();
        }
        self.heartbeat.stop();
        self.transport.close();
        self.socket_health = ChannelHealth::Down;
    }

    fn fail(&mut self, error: ClientError) {
        tracing::error!(%error, "status client error");
        // Cleanup happens before the error becomes observable.
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
            // Observers must never see synced alongside a non-Connected state.
            self.heartbeat.stop();
            self.sync.clear();
            self.connected = false;
        }
    }

    fn state_enter(&mut self, new: ConnectionState) {
        match new {
            ConnectionState::Connected => self.connected = true,
            ConnectionState::Disconnected => {
                self.error = None;
                self.reset_snapshots();
            }
            ConnectionState::Error => self.reset_snapshots(),
            _ => {}
        }
    }

    fn apply_payload(&mut self, channel: StatusChannel, payload: Option<&str>, full: bool) {
        let Some(text) = payload else { return };
        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(topic = channel.topic(), error = %e, "bad update payload");
                return;
            }
        };

        let entry = self
            .snapshots
            .entry(channel)
            .or_insert_with(|| Value::Object(Map::new()));
        if full {
            *entry = value;
        } else {
            merge_delta(entry, value);
        }
    }

    fn reset_snapshot(&mut self, channel: StatusChannel) {
        self.snapshots.insert(channel, Value::Object(Map::new()));
        if channel.intersects(StatusChannel::TASK | StatusChannel::INTERP) {
            self.update_running();
        }
    }

    fn reset_snapshots(&mut self) {
        for channel in self.sync.expected().channels() {
            self.snapshots.insert(channel, Value::Object(Map::new()));
        }
        self.update_running();
    }

    fn update_running(&mut self) {
        let task_mode = self
            .snapshots
            .get(&StatusChannel::TASK)
            .and_then(|t| t.get("taskMode"))
            .and_then(Value::as_f64);
        let interp_state = self
            .snapshots
            .get(&StatusChannel::INTERP)
            .and_then(|i| i.get("interpState"))
            .and_then(Value::as_f64);

        let running = matches!(
            (task_mode, interp_state),
            (Some(mode), Some(state))
                if (mode == TASK_MODE_AUTO || mode == TASK_MODE_MDI)
                    && state != INTERP_STATE_IDLE
        );

        if running != self.running {
            self.running = running;
            tracing::debug!(running, "program execution state changed");
        }
    }
}

/// Shallow-merges an incremental delta into a snapshot. Non-object values
/// replace the snapshot wholesale.
pub(crate) fn merge_delta(snapshot: &mut Value, delta: Value) {
    match (snapshot, delta) {
        (Value::Object(base), Value::Object(update)) => {
            for (key, value) in update {
                base.insert(key, value);
            }
        }
        (slot, delta) => *slot = delta,
    }
}
