//! Interval gates — periodic work decoupled from the loop tick rate.

use std::time::Duration;
use tokio::time::Instant;

/// Opens at most once per `every`. The first check always opens.
#[derive(Debug, Clone)]
pub struct IntervalGate {
    every: Duration,
    last: Option<Instant>,
}

impl IntervalGate {
    pub fn new(every: Duration) -> Self {
        Self { every, last: None }
    }

    /// True when the interval has elapsed; the gate then restarts from `now`.
    pub fn ready(&mut self, now: Instant) -> bool {
        let open = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.every,
        };
        if open {
            self.last = Some(now);
        }
        open
    }

    /// Record a run that happened outside the gate.
    pub fn mark(&mut self, now: Instant) {
        self.last = Some(now);
    }
}
