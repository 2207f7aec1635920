//! Single owner of the backend session that mirrors the running phase.
//!
//! The synchronizer never talks to the network itself. Each operation
//! updates the local slot and returns the [`SessionCall`] the runtime must
//! perform; results come back through [`SessionSynchronizer::on_created`]
//! and [`SessionSynchronizer::on_updated`].
//!
//! ## Slot lifecycle
//!
//! ```text
//! Empty -> Opening(ticket) -> Open(session) -> Empty
//! ```
//!
//! A create request that is still in flight when its phase is closed leaves
//! the slot immediately; its ticket is remembered together with how it was
//! closed, and the session is completed or cancelled as soon as its id
//! arrives. That keeps at most one session open and lets the next phase
//! start its own session without waiting. A create still in flight at exit
//! is remembered the same way and beacon-cancelled when it lands.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::types::{CreateSessionRequest, Session, SessionId};
use crate::error::BackendError;
use crate::timer::Phase;

/// Correlates a create request with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionTicket(u64);

/// A backend call the runtime must issue on behalf of the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Create {
        ticket: SessionTicket,
        request: CreateSessionRequest,
    },
    Complete {
        session_id: SessionId,
    },
    Cancel {
        session_id: SessionId,
    },
    /// Fire-and-forget cancel that must survive process teardown.
    CancelBeacon {
        session_id: SessionId,
    },
    MarkInterrupted {
        session_id: SessionId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Closing {
    Complete,
    Cancel,
    Unload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Empty,
    Opening {
        ticket: SessionTicket,
        phase: Phase,
        pending_interruptions: u32,
    },
    Open(Session),
}

#[derive(Debug, Clone)]
pub struct SessionSynchronizer {
    slot: Slot,
    orphans: HashMap<SessionTicket, Closing>,
    next_ticket: u64,
}

impl Default for SessionSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionSynchronizer {
    pub fn new() -> Self {
        Self {
            slot: Slot::Empty,
            orphans: HashMap::new(),
            next_ticket: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// True while a session is open or its creation is in flight.
    pub fn has_open_session(&self) -> bool {
        !matches!(self.slot, Slot::Empty)
    }

    pub fn open_session(&self) -> Option<&Session> {
        match &self.slot {
            Slot::Open(session) => Some(session),
            _ => None,
        }
    }

    pub fn is_opening(&self) -> bool {
        matches!(self.slot, Slot::Opening { .. })
    }

    /// True while a create issued before exit has not returned yet.
    pub fn awaiting_unload(&self) -> bool {
        self.orphans.values().any(|how| *how == Closing::Unload)
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Open a session for `phase`. Without a credential the request is
    /// dropped and the timer runs local-only. Calling this while a session
    /// is already tracked is refused.
    pub fn start_new_session(
        &mut self,
        phase: Phase,
        time_left_secs: u64,
        authenticated: bool,
    ) -> Option<SessionCall> {
        if !authenticated {
            debug!(%phase, "no credential, session not recorded");
            return None;
        }
        if self.has_open_session() {
            warn!(%phase, "refusing to open a second session");
            return None;
        }
        self.next_ticket += 1;
        let ticket = SessionTicket(self.next_ticket);
        self.slot = Slot::Opening {
            ticket,
            phase,
            pending_interruptions: 0,
        };
        Some(SessionCall::Create {
            ticket,
            request: CreateSessionRequest::for_remaining(phase, time_left_secs),
        })
    }

    /// Close the tracked session as completed. Returns the id of the
    /// session the caller must complete; a create still in flight is
    /// completed when it lands instead.
    pub fn complete_current_session(&mut self) -> Option<SessionId> {
        self.close(Closing::Complete)
    }

    pub fn cancel_current_session(&mut self) -> Option<SessionCall> {
        self.close(Closing::Cancel)
            .map(|session_id| SessionCall::Cancel { session_id })
    }

    /// Cancel for process exit. Uses the beacon path. A create still in
    /// flight is beaconed once its id arrives, see [`Self::awaiting_unload`].
    pub fn cancel_for_unload(&mut self) -> Option<SessionCall> {
        self.close(Closing::Unload)
            .map(|session_id| SessionCall::CancelBeacon { session_id })
    }

    /// Count a pause against the open session.
    pub fn update_session_interruption(&mut self) -> Option<SessionCall> {
        match &mut self.slot {
            Slot::Open(session) => Some(SessionCall::MarkInterrupted {
                session_id: session.id.clone(),
            }),
            Slot::Opening {
                pending_interruptions,
                ..
            } => {
                *pending_interruptions += 1;
                None
            }
            Slot::Empty => None,
        }
    }

    // ── Outcomes ─────────────────────────────────────────────────────

    /// Apply the result of a create request. Returns follow-up calls:
    /// buffered interruptions, or the close of a session whose phase has
    /// already ended.
    pub fn on_created(
        &mut self,
        ticket: SessionTicket,
        result: Result<Session, BackendError>,
    ) -> Vec<SessionCall> {
        let current = matches!(&self.slot, Slot::Opening { ticket: t, .. } if *t == ticket);
        let orphaned = self.orphans.remove(&ticket);

        let session = match result {
            Ok(session) => session,
            Err(err) => {
                if current {
                    self.slot = Slot::Empty;
                }
                if err.is_auth_required() {
                    debug!(?ticket, "session not created: logged out");
                } else {
                    warn!(?ticket, error = %err, "failed to start session");
                }
                return Vec::new();
            }
        };

        if current {
            let pending = match std::mem::replace(&mut self.slot, Slot::Empty) {
                Slot::Opening {
                    pending_interruptions,
                    phase,
                    ..
                } => {
                    if phase != session.session_type {
                        warn!(expected = %phase, got = %session.session_type, "session type mismatch");
                    }
                    pending_interruptions
                }
                _ => 0,
            };
            info!(session_id = %session.id, phase = %session.session_type, "session opened");
            let calls = (0..pending)
                .map(|_| SessionCall::MarkInterrupted {
                    session_id: session.id.clone(),
                })
                .collect();
            self.slot = Slot::Open(session);
            return calls;
        }

        match orphaned {
            Some(Closing::Complete) => {
                info!(session_id = %session.id, "late session closed as completed");
                vec![SessionCall::Complete {
                    session_id: session.id,
                }]
            }
            Some(Closing::Cancel) => {
                info!(session_id = %session.id, "late session closed as cancelled");
                vec![SessionCall::Cancel {
                    session_id: session.id,
                }]
            }
            Some(Closing::Unload) => {
                info!(session_id = %session.id, "late session cancelled on exit");
                vec![SessionCall::CancelBeacon {
                    session_id: session.id,
                }]
            }
            None => {
                warn!(session_id = %session.id, ?ticket, "unknown session ticket, cancelling");
                vec![SessionCall::Cancel {
                    session_id: session.id,
                }]
            }
        }
    }

    /// Refresh the tracked copy after a mutation the backend acknowledged.
    /// Responses for sessions no longer open are ignored.
    pub fn on_updated(&mut self, session: Session) {
        if let Slot::Open(current) = &mut self.slot {
            if current.id == session.id {
                *current = session;
            }
        }
    }

    /// Empty the slot. Returns the id of an open session for the caller to
    /// close; an in-flight create is remembered and closed when it lands.
    fn close(&mut self, how: Closing) -> Option<SessionId> {
        match std::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Empty => None,
            Slot::Opening { ticket, .. } => {
                debug!(?ticket, ?how, "closing session still being created");
                self.orphans.insert(ticket, how);
                None
            }
            Slot::Open(session) => Some(session.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, phase: Phase) -> Session {
        Session {
            id: SessionId::new(id),
            session_type: phase,
            duration_minutes: 25,
            start_time: None,
            end_time: None,
            was_completed: false,
            interruption_count: 0,
        }
    }

    fn ticket_of(call: Option<SessionCall>) -> SessionTicket {
        match call {
            Some(SessionCall::Create { ticket, .. }) => ticket,
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn anonymous_start_is_silent() {
        let mut sync = SessionSynchronizer::new();
        assert_eq!(sync.start_new_session(Phase::Focus, 1500, false), None);
        assert!(!sync.has_open_session());
    }

    #[test]
    fn at_most_one_open_session() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        // Still in flight.
        assert_eq!(sync.start_new_session(Phase::Focus, 1500, true), None);

        sync.on_created(ticket, Ok(session("1", Phase::Focus)));
        assert_eq!(sync.start_new_session(Phase::Focus, 1500, true), None);
        assert_eq!(sync.open_session().unwrap().id.as_str(), "1");
    }

    #[test]
    fn complete_clears_slot() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        sync.on_created(ticket, Ok(session("7", Phase::Focus)));

        assert_eq!(sync.complete_current_session(), Some(SessionId::new("7")));
        assert!(!sync.has_open_session());
        assert_eq!(sync.complete_current_session(), None);
        assert_eq!(sync.cancel_current_session(), None);
    }

    #[test]
    fn interruptions_during_creation_are_flushed() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        assert_eq!(sync.update_session_interruption(), None);
        assert_eq!(sync.update_session_interruption(), None);

        let calls = sync.on_created(ticket, Ok(session("3", Phase::Focus)));
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| matches!(c, SessionCall::MarkInterrupted { .. })));
    }

    #[test]
    fn late_creation_after_cancel_is_cancelled() {
        let mut sync = SessionSynchronizer::new();
        let stale = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        assert_eq!(sync.cancel_current_session(), None);

        // Next phase opens its own session before the stale one returns.
        let fresh = ticket_of(sync.start_new_session(Phase::ShortBreak, 300, true));

        let calls = sync.on_created(stale, Ok(session("old", Phase::Focus)));
        assert_eq!(
            calls,
            vec![SessionCall::Cancel {
                session_id: SessionId::new("old")
            }]
        );
        assert!(sync.is_opening());

        sync.on_created(fresh, Ok(session("new", Phase::ShortBreak)));
        assert_eq!(sync.open_session().unwrap().id.as_str(), "new");
    }

    #[test]
    fn late_creation_after_completion_is_completed() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 60, true));
        assert_eq!(sync.complete_current_session(), None);
        let calls = sync.on_created(ticket, Ok(session("9", Phase::Focus)));
        assert_eq!(
            calls,
            vec![SessionCall::Complete {
                session_id: SessionId::new("9")
            }]
        );
        assert!(!sync.has_open_session());
    }

    #[test]
    fn failed_creation_frees_slot() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        let calls = sync.on_created(
            ticket,
            Err(BackendError::NetworkUnavailable("down".into())),
        );
        assert!(calls.is_empty());
        assert!(!sync.has_open_session());
        assert!(sync.start_new_session(Phase::Focus, 1500, true).is_some());
    }

    #[test]
    fn unload_uses_beacon() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        sync.on_created(ticket, Ok(session("5", Phase::Focus)));
        assert_eq!(
            sync.cancel_for_unload(),
            Some(SessionCall::CancelBeacon {
                session_id: SessionId::new("5")
            })
        );
        assert!(!sync.has_open_session());
    }

    #[test]
    fn unload_during_creation_beacons_late_session() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        assert_eq!(sync.cancel_for_unload(), None);
        assert!(sync.awaiting_unload());

        let calls = sync.on_created(ticket, Ok(session("6", Phase::Focus)));
        assert_eq!(
            calls,
            vec![SessionCall::CancelBeacon {
                session_id: SessionId::new("6")
            }]
        );
        assert!(!sync.awaiting_unload());
    }

    #[test]
    fn unload_during_failed_creation_stops_waiting() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        sync.cancel_for_unload();
        let calls = sync.on_created(ticket, Err(BackendError::NetworkUnavailable("down".into())));
        assert!(calls.is_empty());
        assert!(!sync.awaiting_unload());
    }

    #[test]
    fn updates_for_closed_sessions_are_ignored() {
        let mut sync = SessionSynchronizer::new();
        let ticket = ticket_of(sync.start_new_session(Phase::Focus, 1500, true));
        sync.on_created(ticket, Ok(session("1", Phase::Focus)));

        let mut updated = session("1", Phase::Focus);
        updated.interruption_count = 1;
        sync.on_updated(updated);
        assert_eq!(sync.open_session().unwrap().interruption_count, 1);

        let mut other = session("2", Phase::Focus);
        other.interruption_count = 9;
        sync.on_updated(other);
        assert_eq!(sync.open_session().unwrap().interruption_count, 1);
    }
}
