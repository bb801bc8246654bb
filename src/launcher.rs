//! Application launcher client.
//!
//! Pairs a command channel (probe heartbeat, identity-tagged frames) with a
//! subscribe channel carrying the `launcher` topic. The overall connection is
//! Connected once the command channel answered a ping and the subscribe
//! channel delivered a full launcher snapshot.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::channel_sync::{StatusChannel, SyncTracker};
use crate::config::LauncherConfig;
use crate::endpoint::EndpointAddress;
use crate::envelope::{Envelope, MessageType};
use crate::error::{ClientError, Result};
use crate::fsm::{ChannelHealth, ConnectionState, Machine};
use crate::heartbeat::{HeartbeatMode, HeartbeatMonitor};
use crate::transport::Transport;

const LAUNCHER_TOPIC: &str = "launcher";

/// Launcher client over a command plus a subscribe socket.
pub struct LauncherClient<T: Transport> {
    command_uri: EndpointAddress,
    subscribe_uri: EndpointAddress,
    identity: String,
    heartbeat_interval: Duration,
    command: T,
    subscribe: T,
    machine: Machine<ConnectionState>,
    command_health: ChannelHealth,
    subscribe_health: ChannelHealth,
    command_heartbeat: HeartbeatMonitor,
    subscribe_heartbeat: HeartbeatMonitor,
    sync: SyncTracker,
    connected: bool,
    error: Option<ClientError>,
    subscribed: bool,
    launchers: Value,
}

impl<T: Transport> LauncherClient<T> {
    /// Creates a stopped launcher client. Fails on invalid URIs or an empty
    /// identity.
    pub fn new(config: LauncherConfig, command: T, subscribe: T) -> Result<Self> {
        let (command_uri, subscribe_uri) = config.validated_uris()?;
        Ok(Self {
            command_uri,
            subscribe_uri,
            identity: config.identity,
            heartbeat_interval: config.heartbeat_interval,
            command,
            subscribe,
            machine: Machine::new(ConnectionState::Disconnected),
            command_health: ChannelHealth::Down,
            subscribe_health: ChannelHealth::Down,
            command_heartbeat: HeartbeatMonitor::new(HeartbeatMode::Probe),
            subscribe_heartbeat: HeartbeatMonitor::new(HeartbeatMode::Listen),
            sync: SyncTracker::new(StatusChannel::LAUNCHER),
            connected: false,
            error: None,
            subscribed: false,
            launchers: Value::Array(Vec::new()),
        })
    }

    /// Opens both sockets, subscribes the launcher topic and sends the first
    /// liveness probe. No-op unless currently disconnected.
    pub fn start(&mut self, now: Instant) {
        if !self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        tracing::info!(
            command = %self.command_uri,
            subscribe = %self.subscribe_uri,
            "launcher client starting"
        );
        self.update_state(ConnectionState::Connecting);

        if let Err(e) = self.command.connect(self.command_uri.as_str()) {
            self.fail(e.into());
            return;
        }
        if let Err(e) = self.subscribe.connect(self.subscribe_uri.as_str()) {
            self.fail(e.into());
            return;
        }
        if let Err(e) = self.subscribe.subscribe(LAUNCHER_TOPIC) {
            self.fail(e.into());
            return;
        }
        self.subscribed = true;
        self.command_health = ChannelHealth::Trying;
        self.subscribe_health = ChannelHealth::Trying;

        self.command_heartbeat.start(self.heartbeat_interval, now);
        self.send_envelope(Envelope::new(MessageType::Ping));
    }

    /// Tears both channels down and returns to Disconnected, clearing any
    /// error. No-op if already disconnected.
    pub fn stop(&mut self) {
        if self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        tracing::info!("launcher client stopping");
        self.cleanup();
        self.update_state(ConnectionState::Disconnected);
    }

    /// Feeds one inbound command-channel frame into the client.
    pub fn handle_command_message(&mut self, bytes: &[u8]) {
        // Frames still queued in the host loop when the client was stopped
        // must not resurrect it.
        if self.machine.is(ConnectionState::Disconnected) {
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
                if self.command_health != ChannelHealth::Up {
                    self.command_health = ChannelHealth::Up;
                    self.update_overall();
                }
            }
            MessageType::Error => {
                self.command_health = ChannelHealth::Down;
                self.fail(ClientError::Command(rx.joined_notes()));
            }
            other => {
                tracing::debug!(msg_type = ?other, "unexpected message on command socket");
            }
        }
    }

    /// Feeds one inbound `[topic, envelope]` subscribe message.
    pub fn handle_subscribe_message(&mut self, topic: &str, bytes: &[u8], now: Instant) {
        if self.machine.is(ConnectionState::Disconnected) {
            return;
        }
        let rx = match Envelope::decode(bytes) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(%topic, error = %e, "dropping undecodable launcher frame");
                return;
            }
        };

        match rx.msg_type {
            MessageType::FullUpdate | MessageType::IncrementalUpdate => {
                self.handle_update(&rx, now);
            }
            MessageType::Ping => self.handle_subscribe_ping(now),
            MessageType::Error => {
                self.subscribe_health = ChannelHealth::Down;
                self.fail(ClientError::Service(rx.joined_notes()));
            }
            other => {
                tracing::debug!(msg_type = ?other, "unexpected message on launcher socket");
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

    /// Drives both liveness timers.
    pub fn poll_heartbeats(&mut self, now: Instant) {
        if self.command_heartbeat.due(now) {
            let tick = self.command_heartbeat.tick(now);
            if tick.timed_out {
                tracing::warn!("launcher command channel timeout");
                self.command_health = ChannelHealth::Trying;
                self.update_state(ConnectionState::Timeout);
            }
            if tick.send_probe {
                // Keep probing so an acknowledge can recover the channel.
                self.send_envelope(Envelope::new(MessageType::Ping));
            }
        }

        if self.subscribe_heartbeat.due(now) {
            let tick = self.subscribe_heartbeat.tick(now);
            if tick.timed_out {
                tracing::warn!("launcher subscribe channel timeout");
                self.subscribe_health = ChannelHealth::Down;
                self.update_state(ConnectionState::Timeout);
            }
        }
    }

    /// Starts the application at `index`. Silent no-op unless connected.
    pub fn launcher_start(&mut self, index: u32) {
        self.send_command(Envelope::new(MessageType::LauncherStart).with_index(index));
    }

    /// Sends SIGKILL to the application at `index`.
    pub fn kill(&mut self, index: u32) {
        self.send_command(Envelope::new(MessageType::LauncherKill).with_index(index));
    }

    /// Sends SIGTERM to the application at `index`.
    pub fn terminate(&mut self, index: u32) {
        self.send_command(Envelope::new(MessageType::LauncherTerminate).with_index(index));
    }

    /// Writes `data` to the stdin of the application at `index`.
    pub fn write_to_stdin(&mut self, index: u32, data: &str) {
        self.send_command(
            Envelope::new(MessageType::LauncherWriteStdin)
                .with_index(index)
                .with_payload(data),
        );
    }

    /// Invokes a named system command on the peer.
    pub fn call(&mut self, command: &str) {
        let mut tx = Envelope::new(MessageType::LauncherCall);
        tx.name = Some(command.to_string());
        self.send_command(tx);
    }

    /// Asks the peer to shut itself down.
    pub fn shutdown(&mut self) {
        self.send_command(Envelope::new(MessageType::LauncherShutdown));
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

    /// True once the launcher channel delivered a full snapshot.
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

    /// Snapshot of the launchable applications.
    #[must_use]
    pub fn launchers(&self) -> &Value {
        &self.launchers
    }

    /// Earliest heartbeat deadline for host-loop scheduling.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (
            self.command_heartbeat.next_deadline(),
            self.subscribe_heartbeat.next_deadline(),
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

    /// The subscribe-channel transport.
    #[must_use]
    pub fn subscribe_transport(&self) -> &T {
        &self.subscribe
    }

    fn handle_update(&mut self, rx: &Envelope, now: Instant) {
        let full = rx.msg_type == MessageType::FullUpdate;

        if let Some(text) = rx.payload.as_deref() {
            match serde_json::from_str::<Value>(text) {
                Ok(value) if full => self.launchers = value,
                Ok(value) => merge_launchers(&mut self.launchers, value),
                Err(e) => tracing::warn!(error = %e, "bad launcher payload"),
            }
        }

        if full {
            if self.sync.mark_synced(StatusChannel::LAUNCHER) {
                tracing::info!("launcher channel synced");
            }
            if self.subscribe_health != ChannelHealth::Up {
                self.subscribe_health = ChannelHealth::Up;
                self.update_overall();
            }
            if let Some(pparams) = rx.pparams {
                let timeout = Duration::from_millis(pparams.keepalive_timer_ms * 2);
                self.subscribe_heartbeat.start(timeout, now);
            }
        } else {
            self.subscribe_heartbeat.refresh(now);
        }
    }

    fn handle_subscribe_ping(&mut self, now: Instant) {
        if self.subscribe_health == ChannelHealth::Up {
            self.subscribe_heartbeat.refresh(now);
        } else {
            tracing::debug!("peer ping while launcher channel not up, resubscribing");
            self.update_state(ConnectionState::Connecting);
            if self.subscribed {
                if let Err(e) = self.subscribe.unsubscribe(LAUNCHER_TOPIC) {
                    tracing::warn!(error = %e, "unsubscribe failed");
                }
            }
            if let Err(e) = self.subscribe.subscribe(LAUNCHER_TOPIC) {
                self.fail(e.into());
                return;
            }
            self.subscribed = true;
            self.subscribe_health = ChannelHealth::Trying;
        }
    }

    fn update_overall(&mut self) {
        if self.command_health == ChannelHealth::Up
            && self.subscribe_health == ChannelHealth::Up
        {
            self.update_state(ConnectionState::Connected);
        }
    }

    fn send_command(&mut self, tx: Envelope) {
        // Commands are dropped, not queued, while not connected.
        if !self.connected {
            tracing::debug!(msg_type = ?tx.msg_type, "dropping command while not connected");
            return;
        }
        self.send_envelope(tx);
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
        if let Err(e) = self.command.send(vec![bytes]) {
            self.fail(e.into());
        }
    }

    fn cleanup(&mut self) {
        if self.subscribed {
            if let Err(e) = self.subscribe.unsubscribe(LAUNCHER_TOPIC) {
                tracing::warn!(error = %e, "unsubscribe failed");
            }
            self.subscribed = false;
        }
        self.command_heartbeat.stop();
        self.subscribe_heartbeat.stop();
        self.command.close();
        self.subscribe.close();
        self.command_health = ChannelHealth::Down;
        self.subscribe_health = ChannelHealth::Down;
    }

    fn fail(&mut self, error: ClientError) {
        tracing::error!(%error, "launcher client error");
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
            self.sync.clear();
            self.connected = false;
        }
    }

    fn state_enter(&mut self, new: ConnectionState) {
        match new {
            ConnectionState::Connected => self.connected = true,
            ConnectionState::Disconnected => {
                self.error = None;
                self.launchers = Value::Array(Vec::new());
            }
            ConnectionState::Error => self.launchers = Value::Array(Vec::new()),
            _ => {}
        }
    }
}

/// Patches an incremental launcher update into the snapshot. Array elements
/// carrying an `index` replace their counterpart; anything else replaces the
/// snapshot wholesale.
fn merge_launchers(snapshot: &mut Value, delta: Value) {
    let (Value::Array(base), Value::Array(update)) = (&mut *snapshot, delta) else {
        return;
    };
    for entry in update {
        let index = entry.get("index").and_then(Value::as_u64);
        match index.and_then(|i| {
            base.iter()
                .position(|e| e.get("index").and_then(Value::as_u64) == Some(i))
        }) {
            Some(pos) => base[pos] = entry,
            None => base.push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ProtocolParameters;
    use crate::transport::{RecordingTransport, TransportAction};

    const INTERVAL: Duration = Duration::from_secs(3);

    fn client() -> LauncherClient<RecordingTransport> {
        LauncherClient::new(
            LauncherConfig::new("10.0.0.1:5560", "10.0.0.1:5561"),
            RecordingTransport::new(),
            RecordingTransport::new(),
        )
        .unwrap()
    }

    fn sent_envelopes(transport: &RecordingTransport) -> Vec<Envelope> {
        transport
            .sent()
            .iter()
            .map(|frames| Envelope::decode(&frames[0]).unwrap())
            .collect()
    }

    fn connect(c: &mut LauncherClient<RecordingTransport>, now: Instant) {
        c.start(now);
        let ack = Envelope::new(MessageType::PingAcknowledge).encode().unwrap();
        c.handle_command_message(&ack);

        let mut full = Envelope::new(MessageType::FullUpdate)
            .with_payload(r#"[{"index":0,"name":"mill"},{"index":1,"name":"lathe"}]"#);
        full.pparams = Some(ProtocolParameters {
            keepalive_timer_ms: 2000,
        });
        c.handle_subscribe_message(LAUNCHER_TOPIC, &full.encode().unwrap(), now);
    }

    #[test]
    fn test_start_connects_subscribes_and_pings() {
        let mut c = client();
        c.start(Instant::now());

        assert_eq!(c.state(), ConnectionState::Connecting);
        assert_eq!(c.subscribe.subscriptions(), vec![LAUNCHER_TOPIC]);

        let pings = sent_envelopes(&c.command);
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].msg_type, MessageType::Ping);
        assert_eq!(pings[0].identity.as_deref(), Some("launcher"));
    }

    #[test]
    fn test_ack_plus_full_update_connects() {
        let mut c = client();
        let now = Instant::now();
        connect(&mut c, now);

        assert_eq!(c.state(), ConnectionState::Connected);
        assert!(c.connected());
        assert!(c.synced());
        assert_eq!(c.launchers()[1]["name"], Value::from("lathe"));
    }

    #[test]
    fn test_unacknowledged_probe_times_out_once() {
        // Scenario B: a probe goes unanswered for a full period.
        let mut c = client();
        let now = Instant::now();
        connect(&mut c, now);

        c.poll_heartbeats(now + INTERVAL);
        assert_eq!(c.state(), ConnectionState::Connected);

        c.poll_heartbeats(now + 2 * INTERVAL);
        assert_eq!(c.state(), ConnectionState::Timeout);
        assert!(!c.connected());
        assert!(!c.synced());

        // Still Timeout after another silent period, no second transition.
        c.poll_heartbeats(now + 3 * INTERVAL);
        assert_eq!(c.state(), ConnectionState::Timeout);
    }

    #[test]
    fn test_probe_keeps_firing_after_timeout() {
        let mut c = client();
        let now = Instant::now();
        connect(&mut c, now);
        let before = sent_envelopes(&c.command).len();

        c.poll_heartbeats(now + INTERVAL);
        c.poll_heartbeats(now + 2 * INTERVAL);
        assert_eq!(sent_envelopes(&c.command).len(), before + 2);
    }

    #[test]
    fn test_commands_dropped_unless_connected() {
        let mut c = client();
        c.start(Instant::now());
        let before = c.command.sent().len();

        c.launcher_start(0);
        c.kill(1);
        c.shutdown();
        assert_eq!(c.command.sent().len(), before);
    }

    #[test]
    fn test_commands_tagged_with_identity_and_index() {
        let mut c = client();
        let now = Instant::now();
        connect(&mut c, now);

        c.launcher_start(3);
        c.write_to_stdin(3, "M2\n");
        c.call("reboot");

        let sent = sent_envelopes(&c.command);
        let tail = &sent[sent.len() - 3..];
        assert_eq!(tail[0].msg_type, MessageType::LauncherStart);
        assert_eq!(tail[0].index, Some(3));
        assert_eq!(tail[0].identity.as_deref(), Some("launcher"));
        assert_eq!(tail[1].msg_type, MessageType::LauncherWriteStdin);
        assert_eq!(tail[1].payload.as_deref(), Some("M2\n"));
        assert_eq!(tail[2].msg_type, MessageType::LauncherCall);
        assert_eq!(tail[2].name.as_deref(), Some("reboot"));
    }

    #[test]
    fn test_command_error_frame_fails_and_closes_both() {
        let mut c = client();
        let now = Instant::now();
        connect(&mut c, now);

        let err = Envelope::new(MessageType::Error)
            .with_notes(["no such application"])
            .encode()
            .unwrap();
        c.handle_command_message(&err);

        assert_eq!(c.state(), ConnectionState::Error);
        assert_eq!(
            c.error(),
            Some(&ClientError::Command("no such application".into()))
        );
        assert!(c.command.actions.contains(&TransportAction::Close));
        assert!(c.subscribe.actions.contains(&TransportAction::Close));
    }

    #[test]
    fn test_incremental_update_patches_by_index() {
        let mut c = client();
        let now = Instant::now();
        connect(&mut c, now);

        let delta = Envelope::new(MessageType::IncrementalUpdate)
            .with_payload(r#"[{"index":0,"name":"mill","running":true}]"#)
            .encode()
            .unwrap();
        c.handle_subscribe_message(LAUNCHER_TOPIC, &delta, now);

        assert_eq!(c.launchers()[0]["running"], Value::Bool(true));
        assert_eq!(c.launchers()[1]["name"], Value::from("lathe"));
    }

    #[test]
    fn test_stale_update_after_stop_stays_unsynced() {
        let mut c = client();
        let now = Instant::now();
        connect(&mut c, now);
        c.stop();

        // Stale subscribe traffic must never yield synced while Disconnected.
        let full = Envelope::new(MessageType::FullUpdate)
            .with_payload("[]")
            .encode()
            .unwrap();
        c.handle_subscribe_message(LAUNCHER_TOPIC, &full, now);
        let ack = Envelope::new(MessageType::PingAcknowledge).encode().unwrap();
        c.handle_command_message(&ack);

        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert!(!c.synced());
        assert!(!c.connected());
    }

    #[test]
    fn test_stop_resets_snapshot_and_error() {
        let mut c = client();
        let now = Instant::now();
        connect(&mut c, now);
        c.transport_error(48, "address in use");
        assert_eq!(c.state(), ConnectionState::Error);

        c.stop();
        assert_eq!(c.state(), ConnectionState::Disconnected);
        assert!(c.error().is_none());
        assert_eq!(c.launchers(), &Value::Array(Vec::new()));
    }
}
