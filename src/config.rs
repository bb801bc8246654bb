//! Client configuration surface.
//!
//! One small config struct per client variant: socket URIs (validated through
//! [`EndpointAddress`](crate::endpoint::EndpointAddress) at start), the
//! command-channel heartbeat interval (zero disables probing) and the
//! identity string used to tag outbound command frames for peer-side
//! demultiplexing. Durations serialize human-readable (`"3s"`) via
//! `humantime-serde`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::channel_sync::StatusChannel;
use crate::endpoint::EndpointAddress;
use crate::error::{ClientError, Result};

/// Default command-channel heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

fn default_heartbeat() -> Duration {
    DEFAULT_HEARTBEAT_INTERVAL
}

/// Configuration of the status monitor client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    /// Status (subscribe) socket URI.
    pub status_uri: String,
    /// Channels to subscribe; all five status channels by default.
    #[serde(default = "StatusConfig::default_channels")]
    pub channels: StatusChannel,
}

impl StatusConfig {
    /// Creates a config subscribing to every status channel.
    #[must_use]
    pub fn new(status_uri: impl Into<String>) -> Self {
        Self {
            status_uri: status_uri.into(),
            channels: Self::default_channels(),
        }
    }

    fn default_channels() -> StatusChannel {
        StatusChannel::MOTION
            | StatusChannel::CONFIG
            | StatusChannel::IO
            | StatusChannel::TASK
            | StatusChannel::INTERP
    }

    /// Validates and normalizes the status URI.
    pub fn validated_uri(&self) -> Result<EndpointAddress> {
        Ok(EndpointAddress::parse(&self.status_uri)?)
    }
}

/// Configuration of the launcher client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    /// Command (request/acknowledge) socket URI.
    pub command_uri: String,
    /// Subscribe socket URI for the launcher list stream.
    pub subscribe_uri: String,
    /// Identity tag attached to outbound command frames.
    #[serde(default = "LauncherConfig::default_identity")]
    pub identity: String,
    /// Command heartbeat interval; zero disables probing.
    #[serde(with = "humantime_serde", default = "default_heartbeat")]
    pub heartbeat_interval: Duration,
}

impl LauncherConfig {
    /// Creates a launcher config with default identity and heartbeat.
    #[must_use]
    pub fn new(command_uri: impl Into<String>, subscribe_uri: impl Into<String>) -> Self {
        Self {
            command_uri: command_uri.into(),
            subscribe_uri: subscribe_uri.into(),
            identity: Self::default_identity(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    fn default_identity() -> String {
        "launcher".to_string()
    }

    /// Validates both URIs, returning the normalized (command, subscribe) pair.
    pub fn validated_uris(&self) -> Result<(EndpointAddress, EndpointAddress)> {
        if self.identity.trim().is_empty() {
            return Err(ClientError::InvalidConfig("identity cannot be empty".into()));
        }
        Ok((
            EndpointAddress::parse(&self.command_uri)?,
            EndpointAddress::parse(&self.subscribe_uri)?,
        ))
    }
}

/// Configuration of the configuration-browser client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigBrowserConfig {
    /// Config service (command) socket URI.
    pub config_uri: String,
    /// Identity tag attached to outbound command frames.
    #[serde(default = "ConfigBrowserConfig::default_identity")]
    pub identity: String,
    /// Command heartbeat interval; zero disables probing.
    #[serde(with = "humantime_serde", default = "default_heartbeat")]
    pub heartbeat_interval: Duration,
}

impl ConfigBrowserConfig {
    /// Creates a config-browser config with defaults.
    #[must_use]
    pub fn new(config_uri: impl Into<String>) -> Self {
        Self {
            config_uri: config_uri.into(),
            identity: Self::default_identity(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    fn default_identity() -> String {
        "config".to_string()
    }

    /// Validates and normalizes the config URI.
    pub fn validated_uri(&self) -> Result<EndpointAddress> {
        Ok(EndpointAddress::parse(&self.config_uri)?)
    }
}

/// Configuration of a bound remote component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Command socket URI.
    pub command_uri: String,
    /// Data (subscribe) socket URI.
    pub data_uri: String,
    /// Component name; doubles as the data-channel topic and the command
    /// identity tag.
    pub name: String,
    /// Command heartbeat interval; zero disables probing.
    #[serde(with = "humantime_serde", default = "default_heartbeat")]
    pub heartbeat_interval: Duration,
}

impl ComponentConfig {
    /// Creates a component config with the default heartbeat.
    #[must_use]
    pub fn new(
        command_uri: impl Into<String>,
        data_uri: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            command_uri: command_uri.into(),
            data_uri: data_uri.into(),
            name: name.into(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Validates both URIs and the component name.
    pub fn validated_uris(&self) -> Result<(EndpointAddress, EndpointAddress)> {
        if self.name.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "component name cannot be empty".into(),
            ));
        }
        Ok((
            EndpointAddress::parse(&self.command_uri)?,
            EndpointAddress::parse(&self.data_uri)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_defaults_cover_all_five_channels() {
        let config = StatusConfig::new("10.0.0.1:5550");
        assert_eq!(config.channels.iter().count(), 5);
        assert!(!config.channels.contains(StatusChannel::LAUNCHER));
        assert_eq!(config.validated_uri().unwrap().as_str(), "tcp://10.0.0.1:5550");
    }

    #[test]
    fn test_launcher_rejects_empty_identity() {
        let mut config = LauncherConfig::new("10.0.0.1:5560", "10.0.0.1:5561");
        config.identity = "  ".into();
        assert!(matches!(
            config.validated_uris().unwrap_err(),
            ClientError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_component_rejects_empty_name() {
        let config = ComponentConfig::new("10.0.0.1:5570", "10.0.0.1:5571", "");
        assert!(config.validated_uris().is_err());
    }

    #[test]
    fn test_bad_uri_maps_to_invalid_config() {
        let config = ConfigBrowserConfig::new("http://machine.local:80");
        assert!(matches!(
            config.validated_uri().unwrap_err(),
            ClientError::InvalidConfig(_)
        ));
    }

    #[test]
    fn test_serde_round_trip_with_humantime() {
        let config = LauncherConfig::new("10.0.0.1:5560", "10.0.0.1:5561");
        let json = serde_json::to_string(&config).unwrap();
        let back: LauncherConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(back.identity, "launcher");
    }
}
