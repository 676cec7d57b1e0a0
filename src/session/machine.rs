//! Bookkeeping for the persistent session: port selection, keep-alive budget
//! and edge-triggered link state. No I/O happens here.

use std::fmt;
use std::time::Duration;

/// Where the persistent session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Resolving,
    Connecting,
    LoggingIn,
    AwaitingPollPermission,
    Polling,
    DeliveringEvent,
    Disconnected,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Device link state as seen by the rest of the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Reports link state only when it actually changes.
#[derive(Debug)]
pub(crate) struct LinkTracker {
    state: LinkState,
}

impl LinkTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: LinkState::Disconnected,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> LinkState {
        self.state
    }

    /// Record the latest state; returns it only on a transition.
    pub(crate) fn update(&mut self, state: LinkState) -> Option<LinkState> {
        if self.state == state {
            return None;
        }
        self.state = state;
        Some(state)
    }
}

/// Allowance of failed polls before the link is declared dead.
#[derive(Debug)]
pub(crate) struct KeepAliveBudget {
    total: Duration,
    left: Duration,
}

impl KeepAliveBudget {
    pub(crate) fn new(total: Duration) -> Self {
        Self { total, left: total }
    }

    pub(crate) fn reset(&mut self) {
        self.left = self.total;
    }

    /// Charge one failed poll; returns true once the budget is gone.
    ///
    /// Charged with the poll's timeout, not the measured wall-clock time.
    pub(crate) fn charge(&mut self, poll_timeout: Duration) -> bool {
        self.left = self.left.saturating_sub(poll_timeout);
        self.left.is_zero()
    }

    pub(crate) fn left(&self) -> Duration {
        self.left
    }
}

/// Primary port with an optional forwarded fallback.
#[derive(Debug, Clone)]
pub(crate) struct PortSelector {
    primary: u16,
    forwarded: Option<u16>,
    on_forwarded: bool,
}

impl PortSelector {
    pub(crate) fn new(primary: u16, forwarded: Option<u16>) -> Self {
        Self {
            primary,
            forwarded: forwarded.filter(|p| *p != primary && *p != 0),
            on_forwarded: false,
        }
    }

    pub(crate) fn current(&self) -> u16 {
        match (self.on_forwarded, self.forwarded) {
            (true, Some(port)) => port,
            _ => self.primary,
        }
    }

    pub(crate) fn primary(&self) -> u16 {
        self.primary
    }

    pub(crate) fn has_fallback(&self) -> bool {
        self.forwarded.is_some()
    }

    /// Switch between primary and forwarded. No-op without a forwarded port.
    pub(crate) fn flip(&mut self) {
        if self.forwarded.is_some() {
            self.on_forwarded = !self.on_forwarded;
        }
    }

    /// Adopt a newly learned primary port and go back to it.
    pub(crate) fn set_primary(&mut self, port: u16) {
        self.primary = port;
        if self.forwarded == Some(port) {
            self.forwarded = None;
        }
        self.on_forwarded = false;
    }
}

/// Result of one poll as far as the session cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollOutcome {
    Idle,
    EventAvailable,
    Failed,
    SessionInvalid,
}

/// What the session does after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStep {
    Continue,
    FetchEvent,
    Reconnect,
}

/// Combines the keep-alive budget with edge-triggered link reporting.
#[derive(Debug)]
pub(crate) struct PollTracker {
    link: LinkTracker,
    budget: KeepAliveBudget,
}

impl PollTracker {
    pub(crate) fn new() -> Self {
        Self {
            link: LinkTracker::new(),
            budget: KeepAliveBudget::new(Duration::ZERO),
        }
    }

    #[cfg(test)]
    pub(crate) fn link(&self) -> LinkState {
        self.link.state()
    }

    pub(crate) fn budget_left(&self) -> Duration {
        self.budget.left()
    }

    /// Polling was granted after a successful login.
    pub(crate) fn on_login(&mut self, keep_alive: Duration) -> Option<LinkState> {
        self.budget = KeepAliveBudget::new(keep_alive);
        self.link.update(LinkState::Connected)
    }

    pub(crate) fn on_poll(&mut self, outcome: PollOutcome, poll_timeout: Duration) -> (PollStep, Option<LinkState>) {
        match outcome {
            PollOutcome::Idle | PollOutcome::EventAvailable => {
                self.budget.reset();
                let change = self.link.update(LinkState::Connected);
                let step = if outcome == PollOutcome::EventAvailable {
                    PollStep::FetchEvent
                } else {
                    PollStep::Continue
                };
                (step, change)
            }
            PollOutcome::Failed => {
                if self.budget.charge(poll_timeout) {
                    (PollStep::Reconnect, self.link.update(LinkState::Disconnected))
                } else {
                    (PollStep::Continue, None)
                }
            }
            PollOutcome::SessionInvalid => (PollStep::Reconnect, self.link.update(LinkState::Disconnected)),
        }
    }

    /// The session gave up on the device outside the poll loop.
    pub(crate) fn on_lost(&mut self) -> Option<LinkState> {
        self.link.update(LinkState::Disconnected)
    }
}
