//! E2E tests for the timer runtime.
//!
//! The runtime runs against in-memory collaborators on a paused tokio
//! clock, so a 25 minute focus phase takes milliseconds of real time.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pawmodoro_core::backend::{
    Anonymous, BackendFuture, Credential, HappinessBoost, IdentityProvider, PetStatsBackend,
    SessionBackend, SkipPenalty, StaticIdentity,
};
use pawmodoro_core::runtime::{self, Collaborators, RuntimeOptions, TimerHandle};
use pawmodoro_core::session::{CreateSessionRequest, Session, SessionId};
use pawmodoro_core::{BackendError, CoordinatorState, Event, NoticeLevel, Phase, Settings};
use tokio::sync::broadcast;

// ============================================================================
// Fake collaborators
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Create(Phase, u32),
    Complete(String),
    Cancel(String),
    Interrupt(String),
    Beacon(String),
}

#[derive(Default)]
struct FakeSessions {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    hang_on_complete: bool,
    create_delay: Option<Duration>,
}

impl FakeSessions {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn session(id: &str, phase: Phase, minutes: u32) -> Session {
    Session {
        id: SessionId::new(id),
        session_type: phase,
        duration_minutes: minutes,
        start_time: None,
        end_time: None,
        was_completed: false,
        interruption_count: 0,
    }
}

impl SessionBackend for FakeSessions {
    fn create_session<'a>(
        &'a self,
        _credential: &'a Credential,
        request: &'a CreateSessionRequest,
    ) -> BackendFuture<'a, Session> {
        Box::pin(async move {
            if let Some(delay) = self.create_delay {
                tokio::time::sleep(delay).await;
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.record(Call::Create(request.session_type, request.duration_minutes));
            Ok(session(&id.to_string(), request.session_type, request.duration_minutes))
        })
    }

    fn complete_session<'a>(&'a self, _credential: &'a Credential, id: &'a SessionId) -> BackendFuture<'a, Session> {
        Box::pin(async move {
            self.record(Call::Complete(id.to_string()));
            if self.hang_on_complete {
                std::future::pending::<()>().await;
            }
            Ok(session(id.as_str(), Phase::Focus, 25))
        })
    }

    fn cancel_session<'a>(&'a self, _credential: &'a Credential, id: &'a SessionId) -> BackendFuture<'a, Session> {
        Box::pin(async move {
            self.record(Call::Cancel(id.to_string()));
            Ok(session(id.as_str(), Phase::Focus, 25))
        })
    }

    fn mark_interrupted<'a>(&'a self, _credential: &'a Credential, id: &'a SessionId) -> BackendFuture<'a, Session> {
        Box::pin(async move {
            self.record(Call::Interrupt(id.to_string()));
            let mut updated = session(id.as_str(), Phase::Focus, 25);
            updated.interruption_count = 1;
            Ok(updated)
        })
    }

    fn cancel_session_beacon(&self, _credential: &Credential, id: &SessionId) -> Result<(), BackendError> {
        self.record(Call::Beacon(id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct FakePets {
    boosts: AtomicU32,
    penalties: AtomicU32,
}

impl PetStatsBackend for FakePets {
    fn boost_happiness_after_focus<'a>(&'a self, _credential: &'a Credential) -> BackendFuture<'a, HappinessBoost> {
        Box::pin(async move {
            self.boosts.fetch_add(1, Ordering::SeqCst);
            Ok(HappinessBoost {
                updated_count: 1,
                failure_count: 0,
                message: "Pawmo got happier from your focus session!".into(),
            })
        })
    }

    fn decrease_stats_on_skip<'a>(&'a self, _credential: &'a Credential) -> BackendFuture<'a, Option<SkipPenalty>> {
        Box::pin(async move {
            self.penalties.fetch_add(1, Ordering::SeqCst);
            Ok(Some(SkipPenalty {
                message: "Pawmo lost happiness and hunger because you skipped focus.".into(),
            }))
        })
    }
}

// ============================================================================
// Test Helpers
// ============================================================================

fn logged_in() -> Arc<dyn IdentityProvider> {
    Arc::new(StaticIdentity(Credential {
        username: "mika".into(),
        access_token: "token".into(),
        refresh_token: None,
        expires_at: None,
    }))
}

struct Harness {
    handle: TimerHandle,
    task: tokio::task::JoinHandle<()>,
    events: broadcast::Receiver<Event>,
    sessions: Arc<FakeSessions>,
    pets: Arc<FakePets>,
}

fn start(settings: Settings, identity: Arc<dyn IdentityProvider>, sessions: FakeSessions) -> Harness {
    let sessions = Arc::new(sessions);
    let pets = Arc::new(FakePets::default());
    let collaborators = Collaborators {
        sessions: sessions.clone(),
        pets: pets.clone(),
        identity,
        settings: Arc::new(settings),
    };
    let (handle, task) = runtime::spawn(collaborators, RuntimeOptions::default());
    let events = handle.subscribe();
    Harness {
        handle,
        task,
        events,
        sessions,
        pets,
    }
}

/// Receive until `pred` matches. Ticks can outrun a slow subscriber, so
/// lag is tolerated.
async fn wait_for(rx: &mut broadcast::Receiver<Event>, mut pred: impl FnMut(&Event) -> bool) -> Event {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("runtime closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(4 * 3600), wait)
        .await
        .expect("event not observed")
}

fn short_focus() -> Settings {
    Settings {
        focus_duration: 1,
        ..Settings::default()
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_focus_completion_auto_starts_break() {
    let settings = Settings {
        auto_start_breaks: true,
        ..Settings::default()
    };
    let mut h = start(settings, logged_in(), FakeSessions::default());

    assert_eq!(h.handle.snapshot().await.unwrap().time_left, Some(1500));
    h.handle.play_pause().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::SessionOpened { phase: Phase::Focus, .. })).await;

    let completed = wait_for(&mut h.events, |e| matches!(e, Event::PhaseCompleted { .. })).await;
    assert!(matches!(completed, Event::PhaseCompleted { phase: Phase::Focus, .. }));

    wait_for(&mut h.events, |e| matches!(e, Event::AutoStarted { phase: Phase::ShortBreak, .. })).await;
    wait_for(&mut h.events, |e| {
        matches!(e, Event::SessionOpened { phase: Phase::ShortBreak, .. })
    })
    .await;

    assert_eq!(
        h.sessions.calls(),
        vec![
            Call::Create(Phase::Focus, 25),
            Call::Complete("1".into()),
            Call::Create(Phase::ShortBreak, 5),
        ]
    );
    assert_eq!(h.pets.boosts.load(Ordering::SeqCst), 1);

    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.phase, Phase::ShortBreak);
    assert_eq!(snap.state, CoordinatorState::Running);
    assert!(snap.running);
    assert_eq!(snap.open_session, Some(SessionId::new("2")));
}

#[tokio::test(start_paused = true)]
async fn test_skip_at_ninety_seconds_penalizes_once() {
    let mut h = start(Settings::default(), logged_in(), FakeSessions::default());

    h.handle.play_pause().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::SessionOpened { .. })).await;
    wait_for(&mut h.events, |e| matches!(e, Event::Tick { time_left: 1410, .. })).await;

    h.handle.skip().await.unwrap();
    let skipped = wait_for(&mut h.events, |e| matches!(e, Event::PhaseSkipped { .. })).await;
    assert!(matches!(
        skipped,
        Event::PhaseSkipped {
            from: Phase::Focus,
            to: Phase::ShortBreak,
            penalized: true,
            ..
        }
    ));
    // The penalty and the cancel race each other.
    let mut notice_level = None;
    let mut closed = false;
    wait_for(&mut h.events, |e| {
        match e {
            Event::Notice { level, .. } => notice_level = Some(*level),
            Event::SessionClosed { completed: false, .. } => closed = true,
            _ => {}
        }
        notice_level.is_some() && closed
    })
    .await;
    assert_eq!(notice_level, Some(NoticeLevel::Destructive));

    assert_eq!(h.pets.penalties.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.sessions.calls(),
        vec![Call::Create(Phase::Focus, 25), Call::Cancel("1".into())]
    );

    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.phase, Phase::ShortBreak);
    assert_eq!(snap.time_left, Some(300));
    assert!(!snap.running);
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_keeps_single_session() {
    let mut h = start(Settings::default(), logged_in(), FakeSessions::default());

    h.handle.play_pause().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::SessionOpened { .. })).await;
    wait_for(&mut h.events, |e| matches!(e, Event::Tick { time_left: 1497, .. })).await;

    h.handle.play_pause().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::TimerPaused { .. })).await;

    // Paused: a minute passes without ticks.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.handle.snapshot().await.unwrap().time_left, Some(1497));

    h.handle.play_pause().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::Tick { time_left: 1495, .. })).await;

    assert_eq!(
        h.sessions.calls(),
        vec![Call::Create(Phase::Focus, 25), Call::Interrupt("1".into())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_anonymous_user_runs_local_only() {
    let settings = Settings {
        auto_start_breaks: true,
        ..short_focus()
    };
    let mut h = start(settings, Arc::new(Anonymous), FakeSessions::default());

    h.handle.play_pause().await.unwrap();
    let notice = wait_for(&mut h.events, |e| matches!(e, Event::Notice { .. })).await;
    assert!(matches!(notice, Event::Notice { level: NoticeLevel::Info, .. }));
    wait_for(&mut h.events, |e| matches!(e, Event::AutoStarted { .. })).await;

    // A few seconds into the break the cycle has moved exactly one step.
    tokio::time::sleep(Duration::from_secs(5)).await;
    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.phase, Phase::ShortBreak);
    assert_eq!(snap.cycle_position, 1);
    assert!(snap.running);

    assert!(h.sessions.calls().is_empty());
    assert_eq!(h.pets.boosts.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_hung_backend_times_out_and_cycle_continues() {
    let sessions = FakeSessions {
        hang_on_complete: true,
        ..FakeSessions::default()
    };
    let mut h = start(short_focus(), logged_in(), sessions);

    h.handle.play_pause().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::PhaseCompleted { .. })).await;
    wait_for(&mut h.events, |e| {
        matches!(e, Event::PhaseInitialized { phase: Phase::ShortBreak, .. })
    })
    .await;

    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.state, CoordinatorState::Ready);
    assert_eq!(h.pets.boosts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_beacons_open_session() {
    let mut h = start(Settings::default(), logged_in(), FakeSessions::default());

    h.handle.play_pause().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::SessionOpened { .. })).await;

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();

    assert_eq!(
        h.sessions.calls(),
        vec![Call::Create(Phase::Focus, 25), Call::Beacon("1".into())]
    );
    assert!(h.handle.play_pause().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_session_in_flight() {
    let sessions = FakeSessions {
        create_delay: Some(Duration::from_millis(500)),
        ..FakeSessions::default()
    };
    let h = start(Settings::default(), logged_in(), sessions);

    h.handle.play_pause().await.unwrap();
    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();

    assert_eq!(
        h.sessions.calls(),
        vec![Call::Create(Phase::Focus, 25), Call::Beacon("1".into())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_gives_up_on_slow_session_create() {
    let sessions = FakeSessions {
        create_delay: Some(Duration::from_secs(60)),
        ..FakeSessions::default()
    };
    let h = start(Settings::default(), logged_in(), sessions);

    h.handle.play_pause().await.unwrap();
    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();

    assert!(h.sessions.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_previous_cancels_without_penalty() {
    let mut h = start(Settings::default(), logged_in(), FakeSessions::default());

    h.handle.play_pause().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::SessionOpened { .. })).await;
    wait_for(&mut h.events, |e| matches!(e, Event::Tick { time_left: 1380, .. })).await;

    h.handle.previous().await.unwrap();
    wait_for(&mut h.events, |e| matches!(e, Event::SessionClosed { .. })).await;

    let snap = h.handle.snapshot().await.unwrap();
    assert_eq!(snap.phase, Phase::LongBreak);
    assert_eq!(snap.time_left, Some(900));
    assert_eq!(h.pets.penalties.load(Ordering::SeqCst), 0);
}
