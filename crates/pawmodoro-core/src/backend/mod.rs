//! Collaborator seams consumed by the timer runtime.
//!
//! Every backend is an object-safe trait so the runtime can hold them as
//! `Arc<dyn _>`; async operations return a boxed [`BackendFuture`]. All
//! calls take the bearer [`Credential`] explicitly; obtaining it (and
//! refreshing it) is the job of [`authorize`].

mod http;
mod identity;

pub use http::{
    ApiClient, Cat, CatStats, HttpPetStatsBackend, HttpSessionBackend, HAPPINESS_BOOST,
    SKIP_HAPPINESS_PENALTY, SKIP_HUNGER_PENALTY,
};
pub use identity::{authorize, keyring_store, Anonymous, Credential, IdentityProvider, KeyringIdentity, StaticIdentity};

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::session::{CreateSessionRequest, Session, SessionId};

pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Persistence of session records.
pub trait SessionBackend: Send + Sync {
    fn create_session<'a>(
        &'a self,
        credential: &'a Credential,
        request: &'a CreateSessionRequest,
    ) -> BackendFuture<'a, Session>;

    fn complete_session<'a>(
        &'a self,
        credential: &'a Credential,
        id: &'a SessionId,
    ) -> BackendFuture<'a, Session>;

    fn cancel_session<'a>(
        &'a self,
        credential: &'a Credential,
        id: &'a SessionId,
    ) -> BackendFuture<'a, Session>;

    fn mark_interrupted<'a>(
        &'a self,
        credential: &'a Credential,
        id: &'a SessionId,
    ) -> BackendFuture<'a, Session>;

    /// Best-effort cancel used on exit. Must return without waiting for the
    /// request and must not depend on the caller's runtime staying alive.
    fn cancel_session_beacon(&self, credential: &Credential, id: &SessionId) -> Result<(), BackendError>;
}

/// Summary of the post-focus happiness boost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HappinessBoost {
    pub updated_count: u32,
    pub failure_count: u32,
    pub message: String,
}

/// Result of the skip penalty, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipPenalty {
    pub message: String,
}

/// Pet happiness/hunger adjustments.
pub trait PetStatsBackend: Send + Sync {
    fn boost_happiness_after_focus<'a>(&'a self, credential: &'a Credential) -> BackendFuture<'a, HappinessBoost>;

    /// `None` when there was nothing to penalize (no pets).
    fn decrease_stats_on_skip<'a>(&'a self, credential: &'a Credential) -> BackendFuture<'a, Option<SkipPenalty>>;
}
