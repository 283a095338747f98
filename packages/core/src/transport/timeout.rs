//! Progressive Timeout
//!
//! A per-request timeout that renews itself a bounded number of times before
//! giving up, so long-running plugin operations are not cut off after a
//! single window.
//!
//! ```text
//! Waiting(3) --deadline--> Waiting(2) --deadline--> Waiting(1) --deadline--> Waiting(0) --deadline--> Expired
//!      ^                                                                         |
//!      +--------------------------- progress (deadline = now + window) ----------+
//! ```

use std::time::Duration;
use tokio::time::Instant;

/// Extension rounds granted to every request before it may expire
pub const DEFAULT_TIMEOUT_EXTENSIONS: u32 = 3;

/// Where a request is in its timeout lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    /// Still waiting, with `remaining` renewals left
    Waiting { remaining: u32 },
    /// Budget exhausted; the request must be rejected
    Expired,
}

/// Outcome of checking the timeout at a given instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStep {
    /// Deadline not reached (it may have been pushed out by progress)
    Pending { deadline: Instant },
    /// Deadline reached and one renewal was spent
    Extended { deadline: Instant, remaining: u32 },
    /// Deadline reached with no renewals left
    Expired { elapsed: Duration },
}

/// Timeout state machine for one pending request
#[derive(Debug, Clone)]
pub struct ProgressiveTimeout {
    window: Duration,
    started: Instant,
    deadline: Instant,
    state: TimeoutState,
}

impl ProgressiveTimeout {
    /// Start a timeout of `window` with `extensions` renewals, beginning at `now`
    pub fn new(window: Duration, extensions: u32, now: Instant) -> Self {
        Self {
            window,
            started: now,
            deadline: now + window,
            state: TimeoutState::Waiting {
                remaining: extensions,
            },
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn state(&self) -> TimeoutState {
        self.state
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Record activity: the current window restarts from `now`
    ///
    /// Does not refill the renewal budget and has no effect once expired.
    pub fn touch(&mut self, now: Instant) {
        if let TimeoutState::Waiting { .. } = self.state {
            let refreshed = now + self.window;
            if refreshed > self.deadline {
                self.deadline = refreshed;
            }
        }
    }

    /// Advance the state machine for a wake-up at `now`
    pub fn poll(&mut self, now: Instant) -> TimeoutStep {
        match self.state {
            TimeoutState::Expired => TimeoutStep::Expired {
                elapsed: self.elapsed(now),
            },
            TimeoutState::Waiting { .. } if now < self.deadline => TimeoutStep::Pending {
                deadline: self.deadline,
            },
            TimeoutState::Waiting { remaining: 0 } => {
                self.state = TimeoutState::Expired;
                TimeoutStep::Expired {
                    elapsed: self.elapsed(now),
                }
            }
            TimeoutState::Waiting { remaining } => {
                let remaining = remaining - 1;
                self.state = TimeoutState::Waiting { remaining };
                self.deadline = now + self.window;
                TimeoutStep::Extended {
                    deadline: self.deadline,
                    remaining,
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "timeout_test.rs"]
mod timeout_test;
