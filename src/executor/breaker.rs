//! Trailing-window circuit breaker
//!
//! Counts failures inside a sliding wall-clock window. Once the count
//! reaches the threshold the breaker is open and executions are rejected
//! before any network I/O; it closes again as the failures age out.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Breaker state exposed on the stats surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
}

pub struct CircuitBreaker {
    threshold: usize,
    window: Duration,
    events: Mutex<VecDeque<(Instant, bool)>>,
}

impl CircuitBreaker {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record an execution outcome
    pub fn record(&self, success: bool) {
        self.record_at(Instant::now(), success);
    }

    /// Record an outcome at an explicit time; used for seeding from the
    /// external store after a restart
    pub fn record_at(&self, at: Instant, success: bool) {
        let mut events = self.events.lock().expect("breaker poisoned");
        events.push_back((at, success));
        Self::prune(&mut events, self.window);
    }

    /// Seed the window from persisted outcomes
    pub fn seed<I: IntoIterator<Item = (Instant, bool)>>(&self, outcomes: I) {
        let mut events = self.events.lock().expect("breaker poisoned");
        for (at, success) in outcomes {
            events.push_back((at, success));
        }
        events.make_contiguous().sort_by_key(|(at, _)| *at);
        Self::prune(&mut events, self.window);
    }

    /// Failures currently inside the trailing window
    pub fn failures(&self) -> usize {
        let mut events = self.events.lock().expect("breaker poisoned");
        Self::prune(&mut events, self.window);
        events.iter().filter(|(_, success)| !success).count()
    }

    pub fn is_open(&self) -> bool {
        self.failures() >= self.threshold
    }

    pub fn state(&self) -> BreakerState {
        if self.is_open() {
            BreakerState::Open
        } else {
            BreakerState::Closed
        }
    }

    fn prune(events: &mut VecDeque<(Instant, bool)>, window: Duration) {
        let now = Instant::now();
        while let Some((at, _)) = events.front() {
            if now.duration_since(*at) > window {
                events.pop_front();
            } else {
                break;
            }
        }
    }
}
