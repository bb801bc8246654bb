//! Client engine for the machine-control protocol.
//!
//! This crate implements the connection lifecycle, heartbeat liveness and
//! multi-channel synchronization logic of a machine-control client, plus
//! four façades built on top of it: status monitoring, application
//! launching, configuration browsing and bound remote components. It is
//! transport-agnostic and runtime-agnostic: the host supplies a
//! [`Transport`] implementation, pushes inbound frames into the façades'
//! `handle_*` methods and drives time through `poll_heartbeat*` calls, so
//! the whole engine stays deterministic and single-threaded.

pub mod channel_sync;
pub mod component;
pub mod config;
pub mod config_client;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod fsm;
pub mod heartbeat;
pub mod launcher;
pub mod status;
pub mod transport;

pub use channel_sync::{StatusChannel, SyncTracker};
pub use component::RemoteComponent;
pub use config::{
    ComponentConfig, ConfigBrowserConfig, LauncherConfig, StatusConfig,
    DEFAULT_HEARTBEAT_INTERVAL,
};
pub use config_client::ConfigClient;
pub use endpoint::{normalize_uri, EndpointAddress, EndpointError};
pub use envelope::{Envelope, MessageType, ProtocolParameters};
pub use error::{ClientError, Result};
pub use fsm::{ChannelHealth, ComponentState, ConnectionState, Machine};
pub use heartbeat::{HeartbeatMode, HeartbeatMonitor, HeartbeatTick};
pub use launcher::LauncherClient;
pub use status::StatusClient;
pub use transport::{RecordingTransport, Transport, TransportAction, TransportError};
