//! Jittered timers
//!
//! Every kick draws a fresh threshold from `[min, max]`.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// Inclusive bounds for a jittered period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitterRange {
    pub min: Duration,
    pub max: Duration,
}

impl JitterRange {
    pub fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max.max(min)),
        }
    }

    /// Draw one threshold uniformly from the range.
    pub fn sample(&self) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if min >= max {
            return self.min;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

#[derive(Debug, Clone)]
pub struct JitterTimer {
    range: JitterRange,
    threshold: Duration,
    started: Option<Instant>,
}

impl JitterTimer {
    /// A new timer starts expired so the first cycle fires immediately.
    pub fn new(range: JitterRange) -> Self {
        Self {
            range,
            threshold: range.sample(),
            started: None,
        }
    }

    pub fn expired(&self) -> bool {
        match self.started {
            Some(started) => started.elapsed() >= self.threshold,
            None => true,
        }
    }

    /// Time left until expiry, zero when already expired.
    pub fn remaining(&self) -> Duration {
        match self.started {
            Some(started) => self.threshold.saturating_sub(started.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Restart the timer with a freshly drawn threshold.
    pub fn kick(&mut self) {
        self.threshold = self.range.sample();
        self.started = Some(Instant::now());
    }

    pub fn expire(&mut self) {
        self.started = None;
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}
