//! # Pawmodoro Core Library
//!
//! This library provides the core logic for Pawmodoro, a focus timer whose
//! completed and skipped sessions feed the happiness of virtual cats. The
//! CLI binary is a thin layer over the same library.
//!
//! ## Architecture
//!
//! - **Timer**: phase cycle, countdown clock, skip penalty policy,
//!   auto-start bookkeeping and the [`TimerCoordinator`] state machine that
//!   composes them. The coordinator performs no IO; it returns [`Effect`]s.
//! - **Session**: the [`SessionSynchronizer`] that owns the single backend
//!   session mirroring the running phase
//! - **Backend**: collaborator traits plus reqwest implementations and a
//!   keyring-backed identity
//! - **Runtime**: a tokio task that drives the coordinator and executes its
//!   effects
//! - **Storage**: TOML configuration
//!
//! ## Key Components
//!
//! - [`TimerCoordinator`]: timer/session coordination state machine
//! - [`runtime::spawn`]: run a coordinator against real collaborators
//! - [`Config`]: application configuration management

pub mod backend;
pub mod error;
pub mod events;
pub mod runtime;
pub mod session;
pub mod storage;
pub mod timer;

pub use error::{BackendError, ConfigError, CoreError};
pub use events::{Event, NoticeLevel};
pub use runtime::{Collaborators, Command, RuntimeOptions, TimerHandle};
pub use session::{Session, SessionId, SessionSynchronizer};
pub use storage::{Config, Settings, SettingsProvider, SharedSettings};
pub use timer::{CoordinatorState, Effect, Phase, TimerCoordinator, TimerSnapshot};
