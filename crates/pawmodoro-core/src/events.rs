use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::SessionId;
use crate::timer::Phase;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Destructive,
}

/// Every state change the coordinator makes produces an Event.
/// The UI renders from them; nothing in the core depends on who listens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    PhaseInitialized {
        cycle_position: u8,
        phase: Phase,
        duration_secs: u64,
        at: DateTime<Utc>,
    },
    TimerStarted {
        phase: Phase,
        time_left: u64,
        at: DateTime<Utc>,
    },
    TimerPaused {
        phase: Phase,
        time_left: u64,
        at: DateTime<Utc>,
    },
    Tick {
        phase: Phase,
        time_left: u64,
        at: DateTime<Utc>,
    },
    PhaseCompleted {
        phase: Phase,
        at: DateTime<Utc>,
    },
    PhaseSkipped {
        from: Phase,
        to: Phase,
        penalized: bool,
        at: DateTime<Utc>,
    },
    PhaseRetreated {
        from: Phase,
        to: Phase,
        at: DateTime<Utc>,
    },
    AutoStartScheduled {
        phase: Phase,
        delay_ms: u64,
        at: DateTime<Utc>,
    },
    AutoStarted {
        phase: Phase,
        at: DateTime<Utc>,
    },
    SessionOpened {
        session_id: SessionId,
        phase: Phase,
        at: DateTime<Utc>,
    },
    SessionClosed {
        session_id: SessionId,
        completed: bool,
        at: DateTime<Utc>,
    },
    /// Advisory message for the user (toast).
    Notice {
        level: NoticeLevel,
        title: String,
        message: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn notice(level: NoticeLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Notice {
            level,
            title: title.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn is_tick(&self) -> bool {
        matches!(self, Event::Tick { .. })
    }
}
