//! Per-player liveness tracking with a grace period.
//!
//! The monitor only tracks state; the grace timer itself is scheduled by the
//! match task and comes back as an ordinary event, so a reconnect and a grace
//! expiry are ordered by the match queue.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Connected,
    Disconnected { since: Instant },
}

/// Transitions the coordinator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    /// Tell the opponent and arm the grace timer.
    Dropped,
    /// Tell the opponent and cancel the grace timer.
    Restored { after: Duration },
    /// Grace elapsed without a reconnect.
    Forfeit,
}

#[derive(Debug, Clone)]
pub struct ReconnectMonitor {
    liveness: Liveness,
    grace: Duration,
}

impl ReconnectMonitor {
    pub fn new(grace: Duration) -> Self {
        Self {
            liveness: Liveness::Connected,
            grace,
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn is_connected(&self) -> bool {
        self.liveness == Liveness::Connected
    }

    /// `Connected -> Disconnected(now)`. A second drop keeps the original timestamp.
    pub fn transport_dropped(&mut self, now: Instant) -> Option<LivenessEvent> {
        match self.liveness {
            Liveness::Connected => {
                self.liveness = Liveness::Disconnected { since: now };
                Some(LivenessEvent::Dropped)
            }
            Liveness::Disconnected { .. } => None,
        }
    }

    /// `Disconnected -> Connected`, valid until the grace timer event is processed.
    pub fn transport_restored(&mut self, now: Instant) -> Option<LivenessEvent> {
        match self.liveness {
            Liveness::Connected => None,
            Liveness::Disconnected { since } => {
                self.liveness = Liveness::Connected;
                Some(LivenessEvent::Restored {
                    after: now.saturating_duration_since(since),
                })
            }
        }
    }

    /// Called when the grace timer fires. Only a still-disconnected player forfeits.
    pub fn grace_expired(&self) -> Option<LivenessEvent> {
        match self.liveness {
            Liveness::Disconnected { .. } => Some(LivenessEvent::Forfeit),
            Liveness::Connected => None,
        }
    }
}
