//! Logical status channels and the channel synchronization tracker.
//!
//! A status socket carries several independent topic streams. Each stream
//! delivers one authoritative full snapshot followed by incremental deltas;
//! the tracker reconciles the per-channel "got my full snapshot" bits into a
//! single aggregate `synced` signal. Synchronization is all-or-nothing: the
//! aggregate turns true only once every expected channel has delivered a full
//! update, and deltas never contribute to it.

use bitflags::bitflags;

bitflags! {
    /// Set of logical sub-channels on a status socket.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
    pub struct StatusChannel: u32 {
        /// Motion status stream.
        const MOTION = 1 << 0;
        /// Machine configuration stream.
        const CONFIG = 1 << 1;
        /// I/O status stream.
        const IO = 1 << 2;
        /// Task status stream.
        const TASK = 1 << 3;
        /// Interpreter status stream.
        const INTERP = 1 << 4;
        /// Launcher list stream (single-channel variants).
        const LAUNCHER = 1 << 5;
    }
}

impl StatusChannel {
    /// Topic name for a single-bit channel.
    #[must_use]
    pub fn topic(self) -> &'static str {
        match self {
            Self::MOTION => "motion",
            Self::CONFIG => "config",
            Self::IO => "io",
            Self::TASK => "task",
            Self::INTERP => "interp",
            Self::LAUNCHER => "launcher",
            _ => "",
        }
    }

    /// Channel for an inbound topic name, if known.
    #[must_use]
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            "motion" => Some(Self::MOTION),
            "config" => Some(Self::CONFIG),
            "io" => Some(Self::IO),
            "task" => Some(Self::TASK),
            "interp" => Some(Self::INTERP),
            "launcher" => Some(Self::LAUNCHER),
            _ => None,
        }
    }

    /// Iterator over the individual channels in this set.
    pub fn channels(self) -> impl Iterator<Item = StatusChannel> {
        self.iter()
    }
}

/// Tracks which channels have delivered their initial full snapshot.
#[derive(Debug, Clone)]
pub struct SyncTracker {
    expected: StatusChannel,
    synced: StatusChannel,
    aggregate: bool,
}

impl SyncTracker {
    /// Creates a tracker expecting a full update on every channel in `expected`.
    #[must_use]
    pub fn new(expected: StatusChannel) -> Self {
        Self {
            expected,
            synced: StatusChannel::empty(),
            aggregate: false,
        }
    }

    /// Marks a channel synced after a full update.
    ///
    /// Returns `true` exactly when the aggregate transitions to synced;
    /// repeated calls with no change are a no-op.
    pub fn mark_synced(&mut self, channel: StatusChannel) -> bool {
        self.synced |= channel;

        if !self.aggregate && self.synced.contains(self.expected) {
            self.aggregate = true;
            return true;
        }
        false
    }

    /// Clears the synced mask and the aggregate signal.
    pub fn clear(&mut self) {
        self.synced = StatusChannel::empty();
        self.aggregate = false;
    }

    /// Aggregate synced signal.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        self.aggregate
    }

    /// Channels that have delivered a full update since the last clear.
    #[must_use]
    pub fn synced_channels(&self) -> StatusChannel {
        self.synced
    }

    /// The full expected channel set.
    #[must_use]
    pub fn expected(&self) -> StatusChannel {
        self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_after_new_and_clear() {
        let mut tracker = SyncTracker::new(StatusChannel::MOTION | StatusChannel::TASK);
        assert!(!tracker.is_synced());
        assert!(tracker.synced_channels().is_empty());

        tracker.mark_synced(StatusChannel::MOTION);
        tracker.mark_synced(StatusChannel::TASK);
        assert!(tracker.is_synced());

        tracker.clear();
        assert!(!tracker.is_synced());
        assert!(tracker.synced_channels().is_empty());
    }

    #[test]
    fn test_aggregate_requires_every_channel() {
        let mut tracker = SyncTracker::new(StatusChannel::all() - StatusChannel::LAUNCHER);
        for channel in [
            StatusChannel::MOTION,
            StatusChannel::CONFIG,
            StatusChannel::IO,
            StatusChannel::TASK,
        ] {
            assert!(!tracker.mark_synced(channel));
            assert!(!tracker.is_synced());
        }
        assert!(tracker.mark_synced(StatusChannel::INTERP));
        assert!(tracker.is_synced());
    }

    #[test]
    fn test_aggregate_signal_fires_once() {
        let mut tracker = SyncTracker::new(StatusChannel::LAUNCHER);
        assert!(tracker.mark_synced(StatusChannel::LAUNCHER));
        // Re-marking an already synced channel raises nothing new.
        assert!(!tracker.mark_synced(StatusChannel::LAUNCHER));
        assert!(tracker.is_synced());
    }

    #[test]
    fn test_topic_round_trip() {
        for channel in StatusChannel::all().channels() {
            assert_eq!(StatusChannel::from_topic(channel.topic()), Some(channel));
        }
        assert_eq!(StatusChannel::from_topic("preview"), None);
    }
}
