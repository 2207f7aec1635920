//! Tokio driver for the [`TimerCoordinator`].
//!
//! ```text
//! TimerHandle --Command--> TimerActor --Event--> broadcast subscribers
//!                             |   ^
//!                      spawn  v   | Outcome (mpsc)
//!                          backend tasks
//! ```
//!
//! The actor owns the coordinator and is the only task that touches it.
//! The 1 Hz interval exists only while the coordinator is ticking, and is
//! dropped before any command that changes the phase is handled. Backend
//! calls run as detached tasks bounded by `request_timeout`; their results
//! come back as [`Outcome`]s that the coordinator filters for staleness.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::backend::{authorize, IdentityProvider, PetStatsBackend, SessionBackend};
use crate::error::{BackendError, CoreError};
use crate::events::Event;
use crate::session::SessionCall;
use crate::storage::SettingsProvider;
use crate::timer::{AutoStartToken, Effect, Outcome, TimerCoordinator, TimerSnapshot, AUTO_START_DELAY};

const COMMAND_BUFFER: usize = 32;
const OUTCOME_BUFFER: usize = 64;

/// Everything the coordinator consumes from the outside world.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionBackend>,
    pub pets: Arc<dyn PetStatsBackend>,
    pub identity: Arc<dyn IdentityProvider>,
    pub settings: Arc<dyn SettingsProvider>,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Upper bound for any single backend call.
    pub request_timeout: Duration,
    pub tick_interval: Duration,
    pub auto_start_delay: Duration,
    /// Broadcast buffer; slow subscribers lag past this many events.
    pub event_capacity: usize,
    /// How long shutdown waits for a session create still in flight, so
    /// the session it opens can be cancelled.
    pub exit_grace: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
            auto_start_delay: AUTO_START_DELAY,
            event_capacity: 1024,
            exit_grace: Duration::from_secs(2),
        }
    }
}

#[derive(Debug)]
pub enum Command {
    PlayPause,
    Skip,
    /// Advance not chosen by the user: never penalized, honours auto-start.
    Advance,
    Previous,
    Snapshot(oneshot::Sender<TimerSnapshot>),
    /// Exit path. Replies once the open session has been beacon-cancelled.
    Shutdown(oneshot::Sender<()>),
}

/// Cheap-to-clone handle to a running timer.
#[derive(Clone)]
pub struct TimerHandle {
    sender: mpsc::Sender<Command>,
    event_sender: broadcast::Sender<Event>,
}

impl TimerHandle {
    async fn send(&self, command: Command) -> Result<(), CoreError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| CoreError::RuntimeClosed)
    }

    /// # Errors
    ///
    /// [`CoreError::RuntimeClosed`] if the runtime has stopped.
    pub async fn play_pause(&self) -> Result<(), CoreError> {
        self.send(Command::PlayPause).await
    }

    /// # Errors
    ///
    /// [`CoreError::RuntimeClosed`] if the runtime has stopped.
    pub async fn skip(&self) -> Result<(), CoreError> {
        self.send(Command::Skip).await
    }

    /// # Errors
    ///
    /// [`CoreError::RuntimeClosed`] if the runtime has stopped.
    pub async fn advance(&self) -> Result<(), CoreError> {
        self.send(Command::Advance).await
    }

    /// # Errors
    ///
    /// [`CoreError::RuntimeClosed`] if the runtime has stopped.
    pub async fn previous(&self) -> Result<(), CoreError> {
        self.send(Command::Previous).await
    }

    /// # Errors
    ///
    /// [`CoreError::RuntimeClosed`] if the runtime has stopped.
    pub async fn snapshot(&self) -> Result<TimerSnapshot, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx)).await?;
        rx.await.map_err(|_| CoreError::RuntimeClosed)
    }

    /// Stop the timer, cancelling the open session on the way out.
    ///
    /// # Errors
    ///
    /// [`CoreError::RuntimeClosed`] if the runtime had already stopped.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx)).await?;
        rx.await.map_err(|_| CoreError::RuntimeClosed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_sender.subscribe()
    }
}

/// Spawn the timer actor on the current tokio runtime. The first phase is
/// initialized immediately; subscribe before spawning work that depends on
/// seeing its `PhaseInitialized` event, or read it from a snapshot.
pub fn spawn(collaborators: Collaborators, options: RuntimeOptions) -> (TimerHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(options.event_capacity.max(1));
    let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_BUFFER);

    let coordinator = TimerCoordinator::new(
        Arc::clone(&collaborators.settings),
        Arc::clone(&collaborators.identity),
        options.auto_start_delay,
    );
    let actor = TimerActor {
        coordinator,
        collaborators,
        options,
        commands: cmd_rx,
        events: event_tx.clone(),
        outcome_tx,
        outcomes: outcome_rx,
        ticker: None,
        auto_start: None,
    };
    let task = tokio::spawn(actor.run());

    (
        TimerHandle {
            sender: cmd_tx,
            event_sender: event_tx,
        },
        task,
    )
}

struct TimerActor {
    coordinator: TimerCoordinator,
    collaborators: Collaborators,
    options: RuntimeOptions,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
    outcome_tx: mpsc::Sender<Outcome>,
    outcomes: mpsc::Receiver<Outcome>,
    ticker: Option<Interval>,
    auto_start: Option<(AutoStartToken, Pin<Box<Sleep>>)>,
}

impl TimerActor {
    async fn run(mut self) {
        info!("timer runtime starting");
        let effects = self.coordinator.initialize();
        self.apply(effects);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("all timer handles dropped");
                        self.shutdown().await;
                        break;
                    };
                    if self.handle_command(command).await {
                        break;
                    }
                }
                Some(outcome) = self.outcomes.recv() => {
                    let effects = self.coordinator.on_outcome(outcome);
                    self.apply(effects);
                }
                _ = next_tick(&mut self.ticker) => {
                    let effects = self.coordinator.tick();
                    self.apply(effects);
                }
                token = auto_start_due(&mut self.auto_start) => {
                    self.auto_start = None;
                    let effects = self.coordinator.on_auto_start(token);
                    self.apply(effects);
                }
            }
            self.sync_ticker();
        }

        info!("timer runtime stopped");
    }

    /// Returns `true` when the actor should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        let effects = match command {
            Command::PlayPause => self.coordinator.play_pause(),
            Command::Skip => {
                self.ticker = None;
                self.coordinator.skip()
            }
            Command::Advance => {
                self.ticker = None;
                self.coordinator.advance(true)
            }
            Command::Previous => {
                self.ticker = None;
                self.coordinator.previous()
            }
            Command::Snapshot(respond_to) => {
                let _ = respond_to.send(self.coordinator.snapshot());
                return false;
            }
            Command::Shutdown(respond_to) => {
                self.shutdown().await;
                let _ = respond_to.send(());
                return true;
            }
        };
        self.apply(effects);
        false
    }

    async fn shutdown(&mut self) {
        self.ticker = None;
        let effects = self.coordinator.shutdown();
        self.apply(effects);
        self.auto_start = None;
        if !self.coordinator.awaiting_exit_cancel() {
            return;
        }

        let grace = self.options.exit_grace.min(self.options.request_timeout);
        let drain = async {
            while self.coordinator.awaiting_exit_cancel() {
                let Some(outcome) = self.outcomes.recv().await else {
                    break;
                };
                let effects = self.coordinator.on_outcome(outcome);
                self.apply(effects);
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(?grace, "exiting before session creation returned");
        }
    }

    /// Keep exactly one interval alive while the clock runs.
    fn sync_ticker(&mut self) {
        match (self.coordinator.is_ticking(), self.ticker.is_some()) {
            (true, false) => {
                let period = self.options.tick_interval;
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
            }
            (false, true) => self.ticker = None,
            _ => {}
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    if !event.is_tick() {
                        debug!(?event, "timer event");
                    }
                    // No subscribers is fine.
                    let _ = self.events.send(event);
                }
                Effect::ScheduleAutoStart { token, delay } => {
                    self.auto_start = Some((token, Box::pin(tokio::time::sleep(delay))));
                }
                Effect::CancelAutoStart => self.auto_start = None,
                Effect::Session(call) => self.run_session_call(call),
                Effect::BoostHappiness { generation } => {
                    let pets = Arc::clone(&self.collaborators.pets);
                    let identity = Arc::clone(&self.collaborators.identity);
                    let limit = self.options.request_timeout;
                    self.spawn_backend(async move {
                        let result = bounded(limit, async {
                            let credential = authorize(identity.as_ref()).await?;
                            pets.boost_happiness_after_focus(&credential).await
                        })
                        .await;
                        Outcome::HappinessBoosted { generation, result }
                    });
                }
                Effect::PenalizeSkip => {
                    let pets = Arc::clone(&self.collaborators.pets);
                    let identity = Arc::clone(&self.collaborators.identity);
                    let limit = self.options.request_timeout;
                    self.spawn_backend(async move {
                        let result = bounded(limit, async {
                            let credential = authorize(identity.as_ref()).await?;
                            pets.decrease_stats_on_skip(&credential).await
                        })
                        .await;
                        Outcome::SkipPenalized { result }
                    });
                }
            }
        }
    }

    fn run_session_call(&self, call: SessionCall) {
        let sessions = Arc::clone(&self.collaborators.sessions);
        let identity = Arc::clone(&self.collaborators.identity);
        let limit = self.options.request_timeout;
        match call {
            SessionCall::CancelBeacon { session_id } => {
                // No refresh on the exit path; use whatever token we hold.
                let Some(credential) = identity.credential() else {
                    return;
                };
                match sessions.cancel_session_beacon(&credential, &session_id) {
                    Ok(()) => info!(%session_id, "exit cancel dispatched"),
                    Err(e) => warn!(%session_id, error = %e, "exit cancel not dispatched"),
                }
            }
            SessionCall::Create { ticket, request } => self.spawn_backend(async move {
                let result = bounded(limit, async {
                    let credential = authorize(identity.as_ref()).await?;
                    sessions.create_session(&credential, &request).await
                })
                .await;
                Outcome::SessionCreated { ticket, result }
            }),
            SessionCall::Complete { session_id } => self.spawn_backend(async move {
                let result = bounded(limit, async {
                    let credential = authorize(identity.as_ref()).await?;
                    sessions.complete_session(&credential, &session_id).await
                })
                .await;
                Outcome::SessionClosed {
                    session_id,
                    completed: true,
                    result,
                }
            }),
            SessionCall::Cancel { session_id } => self.spawn_backend(async move {
                let result = bounded(limit, async {
                    let credential = authorize(identity.as_ref()).await?;
                    sessions.cancel_session(&credential, &session_id).await
                })
                .await;
                Outcome::SessionClosed {
                    session_id,
                    completed: false,
                    result,
                }
            }),
            SessionCall::MarkInterrupted { session_id } => self.spawn_backend(async move {
                let result = bounded(limit, async {
                    let credential = authorize(identity.as_ref()).await?;
                    sessions.mark_interrupted(&credential, &session_id).await
                })
                .await;
                Outcome::SessionInterrupted { result }
            }),
        }
    }

    /// Run `work` detached and feed its outcome back into the actor.
    fn spawn_backend<F>(&self, work: F)
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        let tx = self.outcome_tx.clone();
        tokio::spawn(async move {
            let outcome = work.await;
            // Closed channel means the runtime is gone; nothing to report to.
            let _ = tx.send(outcome).await;
        });
    }
}

/// A timeout surfaces as [`BackendError::NetworkUnavailable`].
async fn bounded<T, F>(limit: Duration, work: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    tokio::time::timeout(limit, work).await?
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn auto_start_due(pending: &mut Option<(AutoStartToken, Pin<Box<Sleep>>)>) -> AutoStartToken {
    match pending {
        Some((token, sleep)) => {
            sleep.as_mut().await;
            *token
        }
        None => std::future::pending().await,
    }
}
