//! Keepalive timer state for a connected session.
//!
//! The session task owns one [`Keepalive`] and sleeps until
//! [`deadline`](Keepalive::deadline). When it wakes it asks
//! [`on_deadline`](Keepalive::on_deadline) what to do:
//!
//! ```text
//!   Idle ──(interval elapsed: send PING)──→ AwaitingPong
//!     ↑                                          │
//!     └──────────────(PONG received)─────────────┤
//!                                                └──(timeout elapsed)──→ timed out
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// What the session task should do when the deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Send `PING` and wait for the answer.
    SendPing,
    /// The client never answered; disconnect it.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle { next_ping: Instant },
    AwaitingPong { deadline: Instant },
}

/// Ping/pong bookkeeping for one session.
#[derive(Debug, Clone)]
pub struct Keepalive {
    interval: Duration,
    timeout: Duration,
    phase: Phase,
}

impl Keepalive {
    /// Starts the cycle: the first `PING` goes out `interval` after `now`.
    pub fn start(interval: Duration, timeout: Duration, now: Instant) -> Self {
        Self {
            interval,
            timeout,
            phase: Phase::Idle {
                next_ping: now + interval,
            },
        }
    }

    /// When the session task should next wake up.
    pub fn deadline(&self) -> Instant {
        match self.phase {
            Phase::Idle { next_ping } => next_ping,
            Phase::AwaitingPong { deadline } => deadline,
        }
    }

    /// Returns `true` while a `PING` is outstanding.
    pub fn awaiting_pong(&self) -> bool {
        matches!(self.phase, Phase::AwaitingPong { .. })
    }

    /// Advances the cycle after the deadline passed.
    pub fn on_deadline(&mut self, now: Instant) -> KeepaliveAction {
        match self.phase {
            Phase::Idle { .. } => {
                self.phase = Phase::AwaitingPong {
                    deadline: now + self.timeout,
                };
                KeepaliveAction::SendPing
            }
            Phase::AwaitingPong { .. } => KeepaliveAction::TimedOut,
        }
    }

    /// Records a `PONG`. Returns `false` (and changes nothing) if no
    /// `PING` was outstanding; clients may race us with a stray one.
    pub fn on_pong(&mut self, now: Instant) -> bool {
        match self.phase {
            Phase::AwaitingPong { .. } => {
                self.phase = Phase::Idle {
                    next_ping: now + self.interval,
                };
                true
            }
            Phase::Idle { .. } => false,
        }
    }
}
