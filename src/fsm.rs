//! Connection state vocabulary and the reusable transition component.
//!
//! Each client façade composes a [`Machine`] rather than inheriting FSM
//! boilerplate: the façade computes the next state from a guarded
//! event/state table, runs its exit hook for the old state, commits the
//! switch with [`Machine::advance`], and then runs its enter hook for the
//! new state. Several transitions depend on that ordering (for example
//! stopping the old state's heartbeat before the new state arms its own),
//! and committing the switch before the enter hook keeps nested transitions
//! safe: an enter hook that sends a frame and hits a transport failure may
//! immediately advance again to Error without the outer transition undoing
//! it.

use std::fmt;

/// Lifecycle of the simple client variants (status, launcher, config).
///
/// Transitions are triggered only by named events, never polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected; initial and terminal state.
    Disconnected,
    /// Transport opened, waiting for the first full update or acknowledge.
    Connecting,
    /// Peer confirmed alive.
    Connected,
    /// Heartbeat fired with no intervening traffic; recoverable.
    Timeout,
    /// Transport failure or peer-reported protocol error.
    Error,
}

impl ConnectionState {
    /// Short status label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Timeout => "Timeout",
            Self::Error => "Error",
        }
    }
}

/// Lifecycle of the bind/sync variant used by bound remote components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Not connected; initial state.
    Down,
    /// Command channel opening.
    Trying,
    /// Command channel up, bind request pending send.
    Bind,
    /// Bind request sent, waiting for the peer's verdict.
    Binding,
    /// Bind accepted, data channel opening.
    Syncing,
    /// Data channel up, local items syncing.
    Sync,
    /// Fully bound and synchronized.
    Synced,
    /// Peer rejection or channel failure.
    Error,
}

impl ComponentState {
    /// Short status label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Down => "Down",
            Self::Trying => "Trying",
            Self::Bind => "Bind",
            Self::Binding => "Binding",
            Self::Syncing => "Syncing",
            Self::Sync => "Sync",
            Self::Synced => "Synced",
            Self::Error => "Error",
        }
    }
}

/// Health of a single socket inside a façade, tracked separately from the
/// aggregate connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealth {
    /// Socket closed or silent past its timeout.
    Down,
    /// Subscribed/probing, no confirmation yet.
    Trying,
    /// Traffic confirmed.
    Up,
}

/// Minimal state holder shared by every client variant.
///
/// Generic over any `Copy + Eq + Debug` state enum; the façade owns the
/// event table and passes the computed next state to
/// [`advance`](Self::advance).
#[derive(Debug, Clone)]
pub struct Machine<S> {
    initial: S,
    state: S,
}

impl<S: Copy + Eq + fmt::Debug> Machine<S> {
    /// Creates a machine in its initial state.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            state: initial,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> S {
        self.state
    }

    /// Whether the machine is in `state`.
    #[must_use]
    pub fn is(&self, state: S) -> bool {
        self.state == state
    }

    /// Returns to the initial state without running hooks.
    pub fn reset(&mut self) {
        self.state = self.initial;
    }

    /// Commits one transition and returns the previous state.
    ///
    /// Callers run their exit hook before and their enter hook after this
    /// call; the switch is committed in between so an enter hook that
    /// triggers a further transition never gets unwound.
    pub fn advance(&mut self, next: S) -> S {
        let old = self.state;
        tracing::debug!(from = ?old, to = ?next, "state transition");
        self.state = next;
        old
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Phase {
        Idle,
        Busy,
    }

    #[test]
    fn test_advance_returns_previous_state() {
        let mut machine = Machine::new(Phase::Idle);
        assert_eq!(machine.advance(Phase::Busy), Phase::Idle);
        assert!(machine.is(Phase::Busy));
    }

    #[test]
    fn test_reset_returns_to_initial() {
        let mut machine = Machine::new(Phase::Idle);
        machine.advance(Phase::Busy);
        machine.reset();
        assert!(machine.is(Phase::Idle));
    }
}
