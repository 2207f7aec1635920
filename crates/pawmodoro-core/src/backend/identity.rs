//! Who the user is, as far as the backend is concerned.

use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::http::ApiClient;
use super::BackendFuture;
use crate::error::{BackendError, CoreError};

/// Seconds before expiry at which a token is already treated as stale.
const EXPIRY_SKEW_SECS: i64 = 60;

const CREDENTIAL_KEY: &str = "credential";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub username: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix timestamp; `None` means the token does not expire.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Credential {
    pub fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now().timestamp() > exp - EXPIRY_SKEW_SECS,
            None => false,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of the bearer credential.
pub trait IdentityProvider: Send + Sync {
    /// Current credential, if the user is logged in.
    fn credential(&self) -> Option<Credential>;

    /// Obtain a fresh credential. Fails with [`BackendError::AuthExpired`]
    /// when the user has to log in again.
    fn refresh(&self) -> BackendFuture<'_, Credential>;
}

/// Credential to use for a backend call, refreshed if it is about to expire.
///
/// # Errors
///
/// [`BackendError::AuthRequired`] when logged out; [`BackendError::AuthExpired`]
/// when a refresh was needed and rejected. Transient refresh failures keep
/// their [`BackendError::NetworkUnavailable`] kind.
pub async fn authorize(identity: &dyn IdentityProvider) -> Result<Credential, BackendError> {
    let credential = identity.credential().ok_or(BackendError::AuthRequired)?;
    if !credential.needs_refresh() {
        return Ok(credential);
    }
    debug!(username = %credential.username, "refreshing access token");
    identity.refresh().await.map_err(|err| match err {
        BackendError::NetworkUnavailable(_) => err,
        _ => BackendError::AuthExpired,
    })
}

/// Logged-out user. Everything runs locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl IdentityProvider for Anonymous {
    fn credential(&self) -> Option<Credential> {
        None
    }

    fn refresh(&self) -> BackendFuture<'_, Credential> {
        Box::pin(async { Err(BackendError::AuthRequired) })
    }
}

/// A fixed credential that cannot be refreshed.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub Credential);

impl IdentityProvider for StaticIdentity {
    fn credential(&self) -> Option<Credential> {
        Some(self.0.clone())
    }

    fn refresh(&self) -> BackendFuture<'_, Credential> {
        Box::pin(async { Err(BackendError::AuthExpired) })
    }
}

/// Credential persisted in the OS keyring, refreshed against the API.
pub struct KeyringIdentity {
    api: ApiClient,
    cached: RwLock<Option<Credential>>,
    refreshing: tokio::sync::Mutex<()>,
}

impl KeyringIdentity {
    /// Load the stored credential (if any).
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring cannot be read or holds garbage.
    pub fn load(api: ApiClient) -> Result<Self, CoreError> {
        let cached = match keyring_store::get(CREDENTIAL_KEY)? {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(Self {
            api,
            cached: RwLock::new(cached),
            refreshing: tokio::sync::Mutex::new(()),
        })
    }

    /// Persist `credential` and use it from now on.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring write fails.
    pub fn store(credential: &Credential) -> Result<(), CoreError> {
        keyring_store::set(CREDENTIAL_KEY, &serde_json::to_string(credential)?)?;
        Ok(())
    }

    /// Stored credential without constructing a provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the keyring cannot be read or holds garbage.
    pub fn stored() -> Result<Option<Credential>, CoreError> {
        match keyring_store::get(CREDENTIAL_KEY)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the keyring entry cannot be removed.
    pub fn clear() -> Result<(), CoreError> {
        keyring_store::delete(CREDENTIAL_KEY)?;
        Ok(())
    }

    fn set_cached(&self, credential: Option<Credential>) {
        *self.cached.write().unwrap_or_else(|e| e.into_inner()) = credential;
    }
}

impl IdentityProvider for KeyringIdentity {
    fn credential(&self) -> Option<Credential> {
        self.cached.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn refresh(&self) -> BackendFuture<'_, Credential> {
        Box::pin(async move {
            let _guard = self.refreshing.lock().await;
            // Another caller may have refreshed while we waited.
            let current = self.credential().ok_or(BackendError::AuthRequired)?;
            if !current.needs_refresh() {
                return Ok(current);
            }

            match self.api.refresh_credential(&current).await {
                Ok(fresh) => {
                    if let Err(e) = Self::store(&fresh) {
                        warn!(error = %e, "refreshed credential not persisted");
                    }
                    info!(username = %fresh.username, "access token refreshed");
                    self.set_cached(Some(fresh.clone()));
                    Ok(fresh)
                }
                Err(BackendError::AuthExpired) => {
                    warn!(username = %current.username, "refresh rejected, logging out locally");
                    self.set_cached(None);
                    Err(BackendError::AuthExpired)
                }
                Err(e) => Err(e),
            }
        })
    }
}

/// Thin wrapper around the OS keyring for credential storage.
pub mod keyring_store {
    const SERVICE: &str = "pawmodoro";

    pub fn get(key: &str) -> Result<Option<String>, keyring::Error> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        match entry.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn set(key: &str, value: &str) -> Result<(), keyring::Error> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        entry.set_password(value)
    }

    pub fn delete(key: &str) -> Result<(), keyring::Error> {
        let entry = keyring::Entry::new(SERVICE, key)?;
        match entry.delete_credential() {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
