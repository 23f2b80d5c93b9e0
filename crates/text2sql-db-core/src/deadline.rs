use std::time::{Duration, Instant};

/// Point in time after which work on the current item must stop.
///
/// Passed down from the evaluator or decoding loop into every executor call; the default has no
/// limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { at: None }
    }

    /// A deadline `timeout` from now. Durations too large to represent mean "no limit".
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    pub fn instant(self) -> Option<Instant> {
        self.at
    }

    pub fn is_bounded(self) -> bool {
        self.at.is_some()
    }

    /// Time left before the deadline; `None` when unbounded, zero once passed.
    pub fn remaining(self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn expired(self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}
