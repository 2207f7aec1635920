//! Timer coordinator.
//!
//! The coordinator is a sans-IO state machine. Every input (user command,
//! clock tick, auto-start firing, backend outcome) returns the list of
//! [`Effect`]s the runtime must carry out. It never awaits anything, so the
//! countdown keeps moving no matter how slow or broken the backend is.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Ready <-> Running -> Completing -> Ready (-> Running on auto-start)
//! ```
//!
//! Stale results are filtered by tokens: session creates carry a
//! [`SessionTicket`], completion steps carry the [`Generation`] of the phase
//! they belong to, auto-starts carry an [`AutoStartToken`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::auto_start::{AutoStartScheduler, AutoStartToken};
use super::clock::{Clock, ZeroCrossing};
use super::penalty::should_penalize;
use super::phase::{CyclePosition, Phase};
use crate::backend::{HappinessBoost, IdentityProvider, SkipPenalty};
use crate::error::BackendError;
use crate::events::{Event, NoticeLevel};
use crate::session::{Session, SessionCall, SessionId, SessionSynchronizer, SessionTicket};
use crate::storage::SettingsProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    /// No phase initialized yet.
    Idle,
    /// Phase loaded, clock stopped.
    Ready,
    Running,
    /// Zero-crossing handling in flight.
    Completing,
}

/// Incremented on every phase initialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(u64);

/// Work the runtime performs on the coordinator's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Session(SessionCall),
    BoostHappiness { generation: Generation },
    PenalizeSkip,
    ScheduleAutoStart { token: AutoStartToken, delay: Duration },
    CancelAutoStart,
    Emit(Event),
}

/// Result of a backend call, fed back through [`TimerCoordinator::on_outcome`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    SessionCreated {
        ticket: SessionTicket,
        result: Result<Session, BackendError>,
    },
    SessionClosed {
        session_id: SessionId,
        completed: bool,
        result: Result<Session, BackendError>,
    },
    SessionInterrupted {
        result: Result<Session, BackendError>,
    },
    HappinessBoosted {
        generation: Generation,
        result: Result<HappinessBoost, BackendError>,
    },
    SkipPenalized {
        result: Result<Option<SkipPenalty>, BackendError>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CompletionStep {
    AwaitingSession(SessionId),
    AwaitingBoost,
}

#[derive(Debug, Clone)]
struct Completion {
    generation: Generation,
    phase: Phase,
    step: CompletionStep,
}

/// Serializable view for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub state: CoordinatorState,
    pub phase: Phase,
    pub cycle_position: u8,
    pub time_left: Option<u64>,
    pub initial: Option<u64>,
    pub running: bool,
    pub open_session: Option<SessionId>,
    pub pending_auto_start: bool,
}

pub struct TimerCoordinator {
    state: CoordinatorState,
    position: CyclePosition,
    clock: Clock,
    sessions: SessionSynchronizer,
    auto_start: AutoStartScheduler,
    completing: Option<Completion>,
    generation: Generation,
    settings: Arc<dyn SettingsProvider>,
    identity: Arc<dyn IdentityProvider>,
    relogin_notified: bool,
}

impl TimerCoordinator {
    pub fn new(
        settings: Arc<dyn SettingsProvider>,
        identity: Arc<dyn IdentityProvider>,
        auto_start_delay: Duration,
    ) -> Self {
        Self {
            state: CoordinatorState::Idle,
            position: CyclePosition::default(),
            clock: Clock::new(),
            sessions: SessionSynchronizer::new(),
            auto_start: AutoStartScheduler::new(auto_start_delay),
            completing: None,
            generation: Generation::default(),
            settings,
            identity,
            relogin_notified: false,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.position.phase()
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether the runtime should be delivering ticks.
    pub fn is_ticking(&self) -> bool {
        self.state == CoordinatorState::Running && self.clock.is_running()
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        TimerSnapshot {
            state: self.state,
            phase: self.phase(),
            cycle_position: self.position.index(),
            time_left: self.clock.time_left(),
            initial: self.clock.initial(),
            running: self.clock.is_running(),
            open_session: self.sessions.open_session().map(|s| s.id.clone()),
            pending_auto_start: self.auto_start.pending().is_some(),
        }
    }

    fn authenticated(&self) -> bool {
        self.identity.credential().is_some()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Load the first phase. No-op once initialized.
    pub fn initialize(&mut self) -> Vec<Effect> {
        if self.state != CoordinatorState::Idle {
            return Vec::new();
        }
        vec![Effect::Emit(self.init_phase())]
    }

    pub fn play_pause(&mut self) -> Vec<Effect> {
        let mut effects = self.initialize();
        match self.state {
            CoordinatorState::Ready => self.start(&mut effects),
            CoordinatorState::Running => {
                self.clock.pause();
                self.state = CoordinatorState::Ready;
                if let Some(call) = self.sessions.update_session_interruption() {
                    effects.push(Effect::Session(call));
                }
                effects.push(Effect::Emit(Event::TimerPaused {
                    phase: self.phase(),
                    time_left: self.clock.time_left().unwrap_or(0),
                    at: Utc::now(),
                }));
            }
            CoordinatorState::Completing => {
                debug!(phase = %self.phase(), "play/pause ignored while completing");
            }
            CoordinatorState::Idle => {}
        }
        effects
    }

    /// Manual skip to the next phase.
    pub fn skip(&mut self) -> Vec<Effect> {
        self.advance(false)
    }

    /// Move to the next phase. `auto` marks an advance not chosen by the
    /// user: it is never penalized and it honours the auto-start settings.
    pub fn advance(&mut self, auto: bool) -> Vec<Effect> {
        let mut effects = self.initialize();
        let from = self.phase();
        let elapsed = self.clock.elapsed();
        let time_left = self.clock.time_left().unwrap_or(0);

        self.abandon_phase(&mut effects);

        let penalized = should_penalize(from, elapsed, time_left, auto);
        if penalized {
            if self.authenticated() {
                effects.push(Effect::PenalizeSkip);
            } else {
                debug!("skip penalty not applied: logged out");
            }
        }

        self.position = self.position.advance();
        effects.push(Effect::Emit(self.init_phase()));
        let to = self.phase();
        info!(%from, %to, penalized, auto, "phase skipped");
        effects.push(Effect::Emit(Event::PhaseSkipped {
            from,
            to,
            penalized,
            at: Utc::now(),
        }));
        if auto {
            self.schedule_auto_start(&mut effects);
        }
        effects
    }

    /// Step back one phase. Cancels like a skip, never penalized.
    pub fn previous(&mut self) -> Vec<Effect> {
        let mut effects = self.initialize();
        let from = self.phase();
        self.abandon_phase(&mut effects);

        self.position = self.position.retreat();
        effects.push(Effect::Emit(self.init_phase()));
        let to = self.phase();
        info!(%from, %to, "phase retreated");
        effects.push(Effect::Emit(Event::PhaseRetreated {
            from,
            to,
            at: Utc::now(),
        }));
        effects
    }

    /// One clock second.
    pub fn tick(&mut self) -> Vec<Effect> {
        if self.state != CoordinatorState::Running {
            return Vec::new();
        }
        let crossing = self.clock.tick();
        let mut effects = vec![Effect::Emit(Event::Tick {
            phase: self.phase(),
            time_left: self.clock.time_left().unwrap_or(0),
            at: Utc::now(),
        })];
        if let Some(crossing) = crossing {
            self.begin_completion(crossing, &mut effects);
        }
        effects
    }

    /// The runtime's auto-start delay for `token` elapsed.
    pub fn on_auto_start(&mut self, token: AutoStartToken) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.auto_start.take(token) {
            debug!(?token, "stale auto-start ignored");
            return effects;
        }
        if self.state != CoordinatorState::Ready {
            return effects;
        }
        effects.push(Effect::Emit(Event::AutoStarted {
            phase: self.phase(),
            at: Utc::now(),
        }));
        self.start(&mut effects);
        effects
    }

    /// Exit path: drop everything in flight and beacon-cancel the open
    /// session.
    pub fn shutdown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.clock.pause();
        if self.auto_start.cancel() {
            effects.push(Effect::CancelAutoStart);
        }
        self.completing = None;
        if self.state != CoordinatorState::Idle {
            self.state = CoordinatorState::Ready;
        }
        if let Some(call) = self.sessions.cancel_for_unload() {
            effects.push(Effect::Session(call));
        }
        effects
    }

    /// True after [`Self::shutdown`] while a session create is still in
    /// flight; its session is beacon-cancelled when the outcome arrives.
    pub fn awaiting_exit_cancel(&self) -> bool {
        self.sessions.awaiting_unload()
    }

    // ── Backend outcomes ─────────────────────────────────────────────

    pub fn on_outcome(&mut self, outcome: Outcome) -> Vec<Effect> {
        let mut effects = Vec::new();
        match outcome {
            Outcome::SessionCreated { ticket, result } => {
                let created = result.as_ref().ok().map(|s| (s.id.clone(), s.session_type));
                if let Err(err) = &result {
                    self.note_failure(err, &mut effects);
                }
                let calls = self.sessions.on_created(ticket, result);
                if let Some((session_id, phase)) = created {
                    let opened = self
                        .sessions
                        .open_session()
                        .is_some_and(|s| s.id == session_id);
                    if opened {
                        effects.push(Effect::Emit(Event::SessionOpened {
                            session_id,
                            phase,
                            at: Utc::now(),
                        }));
                    }
                }
                effects.extend(calls.into_iter().map(Effect::Session));
            }
            Outcome::SessionClosed {
                session_id,
                completed,
                result,
            } => {
                match result {
                    Ok(_) => {
                        info!(%session_id, completed, "session closed");
                        effects.push(Effect::Emit(Event::SessionClosed {
                            session_id: session_id.clone(),
                            completed,
                            at: Utc::now(),
                        }));
                    }
                    Err(err) => {
                        warn!(%session_id, completed, error = %err, "failed to close session");
                        self.note_failure(&err, &mut effects);
                    }
                }
                let awaited = self
                    .completing
                    .as_ref()
                    .is_some_and(|c| c.step == CompletionStep::AwaitingSession(session_id));
                if awaited {
                    self.after_session_closed(&mut effects);
                }
            }
            Outcome::SessionInterrupted { result } => match result {
                Ok(session) => self.sessions.on_updated(session),
                Err(err) => {
                    warn!(error = %err, "failed to record interruption");
                    self.note_failure(&err, &mut effects);
                }
            },
            Outcome::HappinessBoosted { generation, result } => {
                match result {
                    Ok(boost) => {
                        let level = if boost.failure_count > 0 {
                            NoticeLevel::Warning
                        } else {
                            NoticeLevel::Success
                        };
                        effects.push(Effect::Emit(Event::notice(level, "Focus complete", boost.message)));
                    }
                    Err(err) => {
                        warn!(error = %err, "happiness boost failed");
                        if !self.note_failure(&err, &mut effects) {
                            effects.push(Effect::Emit(Event::notice(
                                NoticeLevel::Warning,
                                "Failed to update happiness",
                                err.to_string(),
                            )));
                        }
                    }
                }
                let awaited = self.completing.as_ref().is_some_and(|c| {
                    c.generation == generation && c.step == CompletionStep::AwaitingBoost
                });
                if awaited {
                    self.finish_completion(&mut effects);
                }
            }
            Outcome::SkipPenalized { result } => match result {
                Ok(Some(penalty)) => effects.push(Effect::Emit(Event::notice(
                    NoticeLevel::Destructive,
                    "Focus session skipped",
                    penalty.message,
                ))),
                Ok(None) => debug!("skip penalty had no cats to apply to"),
                Err(err) => {
                    warn!(error = %err, "skip penalty failed");
                    self.note_failure(&err, &mut effects);
                }
            },
        }
        effects
    }

    // ── Internals ────────────────────────────────────────────────────

    fn init_phase(&mut self) -> Event {
        let settings = self.settings.settings();
        let phase = self.phase();
        let duration_secs = settings.duration_secs(phase);
        self.clock.reset(duration_secs);
        self.generation.0 += 1;
        self.state = CoordinatorState::Ready;
        debug!(%phase, duration_secs, generation = self.generation.0, "phase initialized");
        Event::PhaseInitialized {
            cycle_position: self.position.index(),
            phase,
            duration_secs,
            at: Utc::now(),
        }
    }

    fn start(&mut self, effects: &mut Vec<Effect>) {
        if self.auto_start.cancel() {
            effects.push(Effect::CancelAutoStart);
        }
        if !self.clock.start() {
            return;
        }
        self.state = CoordinatorState::Running;
        let phase = self.phase();
        let time_left = self.clock.time_left().unwrap_or(0);
        if !self.sessions.has_open_session() {
            let authenticated = self.authenticated();
            if let Some(call) = self.sessions.start_new_session(phase, time_left, authenticated) {
                effects.push(Effect::Session(call));
            }
        }
        effects.push(Effect::Emit(Event::TimerStarted {
            phase,
            time_left,
            at: Utc::now(),
        }));
    }

    /// Stop everything tied to the current phase before it is replaced.
    fn abandon_phase(&mut self, effects: &mut Vec<Effect>) {
        self.clock.pause();
        if self.auto_start.cancel() {
            effects.push(Effect::CancelAutoStart);
        }
        if let Some(completion) = self.completing.take() {
            debug!(generation = completion.generation.0, "completion abandoned");
        }
        if let Some(call) = self.sessions.cancel_current_session() {
            effects.push(Effect::Session(call));
        }
    }

    fn begin_completion(&mut self, _: ZeroCrossing, effects: &mut Vec<Effect>) {
        if self.completing.is_some() {
            warn!(generation = self.generation.0, "zero-crossing while already completing");
            return;
        }
        let phase = self.phase();
        info!(%phase, "phase completed");
        self.state = CoordinatorState::Completing;
        effects.push(Effect::Emit(Event::PhaseCompleted {
            phase,
            at: Utc::now(),
        }));

        match self.sessions.complete_current_session() {
            Some(session_id) => {
                self.completing = Some(Completion {
                    generation: self.generation,
                    phase,
                    step: CompletionStep::AwaitingSession(session_id.clone()),
                });
                effects.push(Effect::Session(SessionCall::Complete { session_id }));
            }
            None => {
                self.completing = Some(Completion {
                    generation: self.generation,
                    phase,
                    step: CompletionStep::AwaitingBoost,
                });
                self.after_session_closed(effects);
            }
        }
    }

    fn after_session_closed(&mut self, effects: &mut Vec<Effect>) {
        let Some(completion) = self.completing.as_mut() else {
            return;
        };
        if !completion.phase.is_focus() {
            self.finish_completion(effects);
            return;
        }
        if self.identity.credential().is_some() {
            completion.step = CompletionStep::AwaitingBoost;
            effects.push(Effect::BoostHappiness {
                generation: completion.generation,
            });
        } else {
            effects.push(Effect::Emit(Event::notice(
                NoticeLevel::Info,
                "Great work!",
                "Sign up to adopt virtual cats and track your progress!",
            )));
            self.finish_completion(effects);
        }
    }

    /// The only place a natural completion advances the cycle.
    fn finish_completion(&mut self, effects: &mut Vec<Effect>) {
        if self.completing.take().is_none() {
            return;
        }
        self.position = self.position.advance();
        effects.push(Effect::Emit(self.init_phase()));
        self.schedule_auto_start(effects);
    }

    fn schedule_auto_start(&mut self, effects: &mut Vec<Effect>) {
        let phase = self.phase();
        if let Some(token) = self.auto_start.schedule(phase, &self.settings.settings()) {
            let delay = self.auto_start.delay();
            effects.push(Effect::ScheduleAutoStart { token, delay });
            effects.push(Effect::Emit(Event::AutoStartScheduled {
                phase,
                delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                at: Utc::now(),
            }));
        }
    }

    /// Returns `true` if the failure was an expired login (already
    /// reported to the user once).
    fn note_failure(&mut self, err: &BackendError, effects: &mut Vec<Effect>) -> bool {
        if !err.is_auth_expired() {
            return false;
        }
        if !self.relogin_notified {
            self.relogin_notified = true;
            effects.push(Effect::Emit(Event::notice(
                NoticeLevel::Warning,
                "Session expired",
                "Log in again to keep your cats in sync.",
            )));
        }
        true
    }
}
