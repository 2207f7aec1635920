use std::sync::Arc;

use clap::Subcommand;
use pawmodoro_core::backend::{
    Anonymous, ApiClient, HttpPetStatsBackend, HttpSessionBackend, IdentityProvider, KeyringIdentity,
};
use pawmodoro_core::runtime::{self, Collaborators, RuntimeOptions, TimerHandle};
use pawmodoro_core::timer::{CyclePosition, CYCLE_LEN};
use pawmodoro_core::{Config, CoreError, Event, SharedSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Run the timer interactively. Reads one key per line from stdin:
    /// p = play/pause, n = skip, b = previous, s = status, q = quit.
    /// Events are printed to stdout as JSON lines.
    Run {
        /// Do not talk to the backend, even when logged in
        #[arg(long)]
        offline: bool,
    },
    /// Print the phase cycle with configured durations as JSON
    Cycle,
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        TimerAction::Run { offline } => run_interactive(offline),
        TimerAction::Cycle => {
            let config = Config::load()?;
            let cycle: Vec<_> = (0..CYCLE_LEN)
                .map(|position| {
                    let phase = CyclePosition::new(position).phase();
                    serde_json::json!({
                        "position": position,
                        "phase": phase,
                        "label": phase.label(),
                        "minutes": config.timer.duration_minutes(phase),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&cycle)?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn run_interactive(offline: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let api = ApiClient::new(&config.api)?;

    let identity: Arc<dyn IdentityProvider> = if offline {
        Arc::new(Anonymous)
    } else {
        match KeyringIdentity::load(api.clone()) {
            Ok(identity) => Arc::new(identity),
            Err(e) => {
                warn!(error = %e, "credential store unavailable, running local-only");
                Arc::new(Anonymous)
            }
        }
    };
    let sessions = Arc::new(HttpSessionBackend::new(api.clone()));
    let collaborators = Collaborators {
        sessions: sessions.clone(),
        pets: Arc::new(HttpPetStatsBackend::new(api)),
        identity,
        settings: Arc::new(SharedSettings::new(config.timer.clone())),
    };
    let options = RuntimeOptions {
        request_timeout: config.api.request_timeout(),
        ..RuntimeOptions::default()
    };

    let (handle, task) = runtime::spawn(collaborators, options);
    let printer = tokio::spawn(print_events(handle.subscribe()));
    print_json(&handle.snapshot().await?)?;

    let result = read_keys(&handle).await;

    match handle.shutdown().await {
        Ok(()) | Err(CoreError::RuntimeClosed) => {}
        Err(e) => return Err(e.into()),
    }
    task.await?;
    printer.abort();
    tokio::task::spawn_blocking(move || sessions.flush_beacons()).await?;
    info!("timer stopped");
    result
}

async fn read_keys(handle: &TimerHandle) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };
        match line.trim() {
            "p" => handle.play_pause().await?,
            "n" => handle.skip().await?,
            "b" => handle.previous().await?,
            "s" => print_json(&handle.snapshot().await?)?,
            "q" => return Ok(()),
            "" => {}
            other => eprintln!("unknown key '{other}' (p/n/b/s/q)"),
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = print_json(&event) {
                    warn!(error = %e, "failed to print event");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
