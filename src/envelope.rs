//! Binary envelope codec.
//!
//! Every frame exchanged with the peer is a tagged `Envelope`: a message-type
//! discriminator plus the handful of type-specific fields the façades need.
//! Domain payloads (status snapshots, launcher lists, application details)
//! travel as JSON text inside the envelope so the framing itself stays
//! schema-free. Encoding is bincode; decode failures surface as
//! [`ClientError::Codec`], never a panic.
//!
//! Wire shapes:
//! - status (subscribe) channel: `[topic, envelope-bytes]` frame pair
//! - command channel: a single `envelope-bytes` frame

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Message-type tag space shared by all client variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Liveness probe.
    Ping,
    /// Acknowledge of a liveness probe on a command channel.
    PingAcknowledge,
    /// Generic peer-reported error with note lines.
    Error,
    /// Complete snapshot of a channel's domain state.
    FullUpdate,
    /// Partial delta applied on top of prior state.
    IncrementalUpdate,
    /// Bind request declaring a component's interface.
    Bind,
    /// Peer accepted a bind request.
    BindConfirm,
    /// Peer rejected a bind request.
    BindReject,
    /// Data-update command from a bound component.
    Set,
    /// Peer rejected a set command.
    SetReject,
    /// Start a launcher entry by index.
    LauncherStart,
    /// Kill a launcher entry by index.
    LauncherKill,
    /// Terminate a launcher entry by index.
    LauncherTerminate,
    /// Write data to a launched process's stdin.
    LauncherWriteStdin,
    /// Invoke a named command on the launcher service.
    LauncherCall,
    /// Shut the launcher service down.
    LauncherShutdown,
    /// Request the list of available applications.
    ListApplications,
    /// Description of one available application.
    DescribeApplication,
    /// Request a named application's sources.
    RetrieveApplication,
    /// Retrieved application detail.
    ApplicationDetail,
}

impl MessageType {
    /// All tags, in declaration order. Used by round-trip tests.
    pub const ALL: [MessageType; 20] = [
        MessageType::Ping,
        MessageType::PingAcknowledge,
        MessageType::Error,
        MessageType::FullUpdate,
        MessageType::IncrementalUpdate,
        MessageType::Bind,
        MessageType::BindConfirm,
        MessageType::BindReject,
        MessageType::Set,
        MessageType::SetReject,
        MessageType::LauncherStart,
        MessageType::LauncherKill,
        MessageType::LauncherTerminate,
        MessageType::LauncherWriteStdin,
        MessageType::LauncherCall,
        MessageType::LauncherShutdown,
        MessageType::ListApplications,
        MessageType::DescribeApplication,
        MessageType::RetrieveApplication,
        MessageType::ApplicationDetail,
    ];
}

/// Protocol parameters announced by the peer in a full update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    /// Peer-declared keep-alive period in milliseconds. The receive-side
    /// timeout is conventionally sized at double this value.
    pub keepalive_timer_ms: u64,
}

/// Tagged message wrapper carrying a type discriminator and the
/// type-specific fields used by the client façades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type discriminator.
    pub msg_type: MessageType,
    /// Note lines attached to error/reject messages.
    pub note: Vec<String>,
    /// Entry index for launcher commands.
    pub index: Option<u32>,
    /// Name field: launcher call target or application name.
    pub name: Option<String>,
    /// Sender identity tag on outbound command-channel frames.
    pub identity: Option<String>,
    /// Peer protocol parameters, present on some full updates.
    pub pparams: Option<ProtocolParameters>,
    /// Domain payload as JSON text.
    pub payload: Option<String>,
}

impl Envelope {
    /// Creates an empty envelope with the given tag.
    #[must_use]
    pub fn new(msg_type: MessageType) -> Self {
        Self {
            msg_type,
            note: Vec::new(),
            index: None,
            name: None,
            identity: None,
            pparams: None,
            payload: None,
        }
    }

    /// Attaches a JSON payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Attaches an application/item index.
    #[must_use]
    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Attaches note lines.
    #[must_use]
    pub fn with_notes<I, S>(mut self, notes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.note = notes.into_iter().map(Into::into).collect();
        self
    }

    /// Serializes the envelope to bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| ClientError::Codec(e.to_string()))
    }

    /// Deserializes an envelope from bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| ClientError::Codec(e.to_string()))
    }

    /// Joined note lines for error reporting.
    #[must_use]
    pub fn joined_notes(&self) -> String {
        crate::error::join_notes(&self.note)
    }
}
