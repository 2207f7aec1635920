//! Countdown primitive.
//!
//! The clock holds no timer of its own. Whoever drives it calls [`Clock::tick`]
//! once per second while [`Clock::is_running`] is true; the runtime keeps a
//! single interval alive only for as long as that holds, so stopping the
//! clock is the same as cancelling the tick source.

use serde::{Deserialize, Serialize};

/// Emitted by [`Clock::tick`] on the 1 -> 0 transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroCrossing;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clock {
    /// `None` until the first phase has been initialized.
    time_left: Option<u64>,
    initial: Option<u64>,
    running: bool,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_left(&self) -> Option<u64> {
        self.time_left
    }

    pub fn initial(&self) -> Option<u64> {
        self.initial
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Seconds spent in the current phase, derived from the tick count.
    pub fn elapsed(&self) -> Option<u64> {
        match (self.initial, self.time_left) {
            (Some(initial), Some(left)) => Some(initial.saturating_sub(left)),
            _ => None,
        }
    }

    /// Load a new countdown. Always leaves the clock stopped.
    pub fn reset(&mut self, seconds: u64) {
        self.time_left = Some(seconds);
        self.initial = Some(seconds);
        self.running = false;
    }

    /// Returns `true` if the clock transitioned to running. Starting an
    /// already-running, uninitialized or exhausted clock is a no-op.
    pub fn start(&mut self) -> bool {
        match self.time_left {
            Some(left) if left > 0 && !self.running => {
                self.running = true;
                true
            }
            _ => false,
        }
    }

    /// Returns `true` if the clock was running.
    pub fn pause(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }

    /// Advance one second. Fires [`ZeroCrossing`] exactly once per run, on
    /// the tick that reaches zero; the clock stops itself at that point.
    pub fn tick(&mut self) -> Option<ZeroCrossing> {
        if !self.running {
            return None;
        }
        let left = self.time_left.as_mut()?;
        if *left == 0 {
            self.running = false;
            return None;
        }
        *left -= 1;
        if *left == 0 {
            self.running = false;
            return Some(ZeroCrossing);
        }
        None
    }
}
