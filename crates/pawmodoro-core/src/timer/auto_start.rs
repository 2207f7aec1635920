//! Auto-start bookkeeping.
//!
//! The scheduler only decides and remembers. The runtime owns the actual
//! delay; when it elapses it hands the token back and the coordinator asks
//! [`AutoStartScheduler::take`] whether that token is still the pending
//! one. Any phase change calls [`AutoStartScheduler::cancel`], so a delay
//! that was already running can never start the wrong phase.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::phase::Phase;
use crate::storage::Settings;

/// Delay between a natural phase end and the automatic start of the next
/// phase, long enough for completion notices to be shown.
pub const AUTO_START_DELAY: Duration = Duration::from_millis(1500);

/// Identifies one scheduled auto-start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AutoStartToken(u64);

#[derive(Debug, Clone)]
pub struct AutoStartScheduler {
    delay: Duration,
    pending: Option<AutoStartToken>,
    next: u64,
}

impl Default for AutoStartScheduler {
    fn default() -> Self {
        Self::new(AUTO_START_DELAY)
    }
}

impl AutoStartScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            next: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn pending(&self) -> Option<AutoStartToken> {
        self.pending
    }

    /// Whether the settings ask for `upcoming` to start on its own.
    pub fn is_enabled_for(upcoming: Phase, settings: &Settings) -> bool {
        if upcoming.is_focus() {
            settings.auto_start_focus
        } else {
            settings.auto_start_breaks
        }
    }

    /// Called after an automatic phase change. Returns the token to arm if
    /// the settings enable auto-start for `upcoming`. Replaces any earlier
    /// pending token.
    pub fn schedule(&mut self, upcoming: Phase, settings: &Settings) -> Option<AutoStartToken> {
        self.pending = None;
        if !Self::is_enabled_for(upcoming, settings) {
            return None;
        }
        self.next += 1;
        let token = AutoStartToken(self.next);
        self.pending = Some(token);
        Some(token)
    }

    /// Discard the pending auto-start. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Consume `token` if it is still the pending one.
    pub fn take(&mut self, token: AutoStartToken) -> bool {
        if self.pending == Some(token) {
            self.pending = None;
            true
        } else {
            false
        }
    }
}
