//! Heartbeat-based liveness detection.
//!
//! Detects a silently-dead peer on a channel that otherwise produces no
//! traffic. Two modes cover the two channel kinds:
//!
//! - [`HeartbeatMode::Probe`] (command channels): each tick sends a ping and
//!   marks it outstanding; a tick that finds the previous ping still
//!   unacknowledged raises a timeout.
//! - [`HeartbeatMode::Listen`] (subscribe channels): the peer publishes its
//!   own periodic liveness traffic, so a tick firing at all (without an
//!   intervening [`HeartbeatMonitor::refresh`]) means silence was observed
//!   and raises a timeout directly.
//!
//! The monitor is pure deadline arithmetic: the host loop supplies `now` and
//! polls [`due`](HeartbeatMonitor::due)/[`tick`](HeartbeatMonitor::tick), so
//! timing behavior stays deterministic and unit-testable without a runtime.

use std::time::{Duration, Instant};

/// Probing discipline for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMode {
    /// Command channel: send a ping per tick, expect an acknowledge.
    Probe,
    /// Subscribe channel: expect peer traffic, never send.
    Listen,
}

/// What a heartbeat tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTick {
    /// Silence (or a missing acknowledge) was observed; raise a timeout.
    pub timed_out: bool,
    /// A new probe should be sent on the channel.
    pub send_probe: bool,
}

/// Periodic liveness monitor for one channel.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    mode: HeartbeatMode,
    interval: Duration,
    deadline: Option<Instant>,
    probe_outstanding: bool,
}

impl HeartbeatMonitor {
    /// Creates a stopped monitor.
    #[must_use]
    pub fn new(mode: HeartbeatMode) -> Self {
        Self {
            mode,
            interval: Duration::ZERO,
            deadline: None,
            probe_outstanding: false,
        }
    }

    /// Starts the repeating timer. A zero interval leaves the monitor
    /// disabled. Any outstanding-probe flag is cleared.
    pub fn start(&mut self, interval: Duration, now: Instant) {
        self.probe_outstanding = false;
        self.interval = interval;
        self.deadline = if interval.is_zero() {
            None
        } else {
            Some(now + interval)
        };
    }

    /// Cancels the timer.
    pub fn stop(&mut self) {
        self.deadline = None;
        self.probe_outstanding = false;
    }

    /// Restarts the timer from `now` if it is running. Arrival of any
    /// traffic on the channel postpones the next timeout check.
    pub fn refresh(&mut self, now: Instant) {
        if self.deadline.is_some() {
            self.deadline = Some(now + self.interval);
        }
    }

    /// Clears the outstanding-probe flag after an acknowledge arrived.
    pub fn acknowledge(&mut self) {
        self.probe_outstanding = false;
    }

    /// Whether the timer is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Whether the timer period has elapsed.
    #[must_use]
    pub fn due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(deadline) if now >= deadline)
    }

    /// Next firing instant, if running.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fires one timer period and re-arms the next one.
    ///
    /// Callers gate on [`due`](Self::due); calling `tick` on a stopped
    /// monitor is a no-op, so a timeout is never synthesized on a channel
    /// that is already down.
    pub fn tick(&mut self, now: Instant) -> HeartbeatTick {
        if self.deadline.is_none() {
            return HeartbeatTick {
                timed_out: false,
                send_probe: false,
            };
        }

        self.deadline = Some(now + self.interval);

        match self.mode {
            HeartbeatMode::Listen => HeartbeatTick {
                timed_out: true,
                send_probe: false,
            },
            HeartbeatMode::Probe => {
                let timed_out = self.probe_outstanding;
                self.probe_outstanding = true;
                HeartbeatTick {
                    timed_out,
                    send_probe: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(3000);

    #[test]
    fn test_zero_interval_stays_disabled() {
        let mut hb = HeartbeatMonitor::new(HeartbeatMode::Probe);
        hb.start(Duration::ZERO, Instant::now());
        assert!(!hb.is_running());
        assert!(!hb.due(Instant::now() + Duration::from_secs(60)));
    }

    #[test]
    fn test_refresh_prevents_timeout() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(HeartbeatMode::Listen);
        hb.start(INTERVAL, start);

        // Traffic keeps arriving just before each deadline.
        let mut now = start;
        for _ in 0..5 {
            now += INTERVAL - Duration::from_millis(1);
            assert!(!hb.due(now));
            hb.refresh(now);
        }
    }

    #[test]
    fn test_listen_silence_times_out_once_per_period() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(HeartbeatMode::Listen);
        hb.start(INTERVAL, start);

        let now = start + INTERVAL;
        assert!(hb.due(now));
        let tick = hb.tick(now);
        assert!(tick.timed_out);
        assert!(!tick.send_probe);

        // Re-armed: not due again until another full period passes.
        assert!(!hb.due(now + Duration::from_millis(1)));
        assert!(hb.due(now + INTERVAL));
    }

    #[test]
    fn test_probe_times_out_only_when_unacknowledged() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(HeartbeatMode::Probe);
        hb.start(INTERVAL, start);

        // First tick: sends a probe, nothing outstanding yet.
        let tick = hb.tick(start + INTERVAL);
        assert!(!tick.timed_out);
        assert!(tick.send_probe);

        // No acknowledge arrives: second tick raises the timeout.
        let tick = hb.tick(start + 2 * INTERVAL);
        assert!(tick.timed_out);
        assert!(tick.send_probe);

        // Acknowledge clears the flag: next tick is quiet again.
        hb.acknowledge();
        let tick = hb.tick(start + 3 * INTERVAL);
        assert!(!tick.timed_out);
    }

    #[test]
    fn test_stopped_monitor_never_fires() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(HeartbeatMode::Listen);
        hb.start(INTERVAL, start);
        hb.stop();

        let now = start + 10 * INTERVAL;
        assert!(!hb.due(now));
        let tick = hb.tick(now);
        assert!(!tick.timed_out);
        assert!(!tick.send_probe);
    }

    #[test]
    fn test_start_clears_outstanding_probe() {
        let start = Instant::now();
        let mut hb = HeartbeatMonitor::new(HeartbeatMode::Probe);
        hb.start(INTERVAL, start);
        hb.tick(start + INTERVAL);

        hb.start(INTERVAL, start + 2 * INTERVAL);
        let tick = hb.tick(start + 3 * INTERVAL);
        assert!(!tick.timed_out);
    }
}
