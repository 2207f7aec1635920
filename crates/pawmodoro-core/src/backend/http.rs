//! REST clients for the Pawmodoro API.
//!
//! - Sessions: `/api/sessions`
//! - Cats: `/api/cats/{username}`
//! - Token refresh: `/api/users/refresh`

use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use super::identity::Credential;
use super::{BackendFuture, HappinessBoost, PetStatsBackend, SessionBackend, SkipPenalty};
use crate::error::BackendError;
use crate::session::{CreateSessionRequest, Session, SessionId};
use crate::storage::ApiConfig;

/// Happiness added to every cat after a completed focus phase.
pub const HAPPINESS_BOOST: i32 = 10;
/// Happiness removed from every cat on a penalized skip.
pub const SKIP_HAPPINESS_PENALTY: i32 = 10;
/// Hunger removed from every cat on a penalized skip.
pub const SKIP_HUNGER_PENALTY: i32 = 5;

const BEACON_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared HTTP plumbing: base URL, client, status mapping.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns an error if the base URL is not an absolute http(s) URL or
    /// the HTTP client cannot be built.
    pub fn new(config: &ApiConfig) -> Result<Self, BackendError> {
        let base = Url::parse(&config.base_url).map_err(|e| BackendError::Rejected {
            status: 0,
            message: format!("invalid base url '{}': {e}", config.base_url),
        })?;
        if base.cannot_be_a_base() {
            return Err(BackendError::Rejected {
                status: 0,
                message: format!("invalid base url '{}'", config.base_url),
            });
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| BackendError::NetworkUnavailable(e.to_string()))?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Rejected {
                status: 0,
                message: format!("invalid base url '{}'", self.base),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, BackendError> {
        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BackendError::AuthExpired);
        }
        let message = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// # Errors
    ///
    /// [`BackendError::AuthExpired`] if there is no refresh token or the
    /// backend rejects it.
    pub async fn refresh_credential(&self, current: &Credential) -> Result<Credential, BackendError> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(BackendError::AuthExpired)?;
        let url = self.endpoint(&["api", "users", "refresh"])?;
        let body: RefreshResponse = Self::send_json(
            self.client
                .post(url)
                .json(&json!({ "refreshToken": refresh_token })),
        )
        .await?;

        Ok(Credential {
            username: current.username.clone(),
            access_token: body.access_token,
            refresh_token: body.refresh_token.or_else(|| current.refresh_token.clone()),
            expires_at: body
                .expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs),
        })
    }
}

// ── Sessions ─────────────────────────────────────────────────────────

/// Session records over REST.
pub struct HttpSessionBackend {
    api: ApiClient,
    beacons: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpSessionBackend {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            beacons: Mutex::new(Vec::new()),
        }
    }

    fn patch(&self, credential: &Credential, id: &SessionId, action: &str) -> Result<RequestBuilder, BackendError> {
        let url = self.api.endpoint(&["api", "sessions", id.as_str(), action])?;
        Ok(self.api.client.patch(url).bearer_auth(&credential.access_token))
    }

    /// Block until every beacon sent so far has finished (each is bounded
    /// by its own timeout). Call right before the process exits.
    pub fn flush_beacons(&self) {
        let handles = std::mem::take(&mut *self.beacons.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if handle.join().is_err() {
                warn!("session beacon thread panicked");
            }
        }
    }
}

impl SessionBackend for HttpSessionBackend {
    fn create_session<'a>(
        &'a self,
        credential: &'a Credential,
        request: &'a CreateSessionRequest,
    ) -> BackendFuture<'a, Session> {
        Box::pin(async move {
            let url = self.api.endpoint(&["api", "sessions"])?;
            ApiClient::send_json(
                self.api
                    .client
                    .post(url)
                    .bearer_auth(&credential.access_token)
                    .json(request),
            )
            .await
        })
    }

    fn complete_session<'a>(&'a self, credential: &'a Credential, id: &'a SessionId) -> BackendFuture<'a, Session> {
        Box::pin(async move { ApiClient::send_json(self.patch(credential, id, "complete")?).await })
    }

    fn cancel_session<'a>(&'a self, credential: &'a Credential, id: &'a SessionId) -> BackendFuture<'a, Session> {
        Box::pin(async move { ApiClient::send_json(self.patch(credential, id, "cancel")?).await })
    }

    fn mark_interrupted<'a>(&'a self, credential: &'a Credential, id: &'a SessionId) -> BackendFuture<'a, Session> {
        Box::pin(async move { ApiClient::send_json(self.patch(credential, id, "interruption")?).await })
    }

    /// Sends the cancel from a dedicated OS thread with its own runtime and
    /// client, so it is unaffected by the caller's runtime shutting down.
    /// The token travels as a query parameter, mirroring a browser beacon.
    fn cancel_session_beacon(&self, credential: &Credential, id: &SessionId) -> Result<(), BackendError> {
        let mut url = self.api.endpoint(&["api", "sessions", id.as_str(), "cancel"])?;
        url.query_pairs_mut()
            .append_pair("Authorization", &format!("Bearer {}", credential.access_token));
        let session_id = id.clone();

        let handle = std::thread::Builder::new()
            .name("session-beacon".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(e) => {
                        warn!(error = %e, "beacon runtime unavailable");
                        return;
                    }
                };
                let sent = runtime.block_on(async {
                    let client = Client::builder().timeout(BEACON_TIMEOUT).build()?;
                    client
                        .post(url)
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .send()
                        .await
                });
                match sent {
                    Ok(resp) if resp.status().is_success() => {
                        info!(%session_id, "session cancelled on exit");
                    }
                    Ok(resp) => warn!(%session_id, status = %resp.status(), "exit cancel rejected"),
                    Err(e) => warn!(%session_id, error = %e, "exit cancel failed"),
                }
            })
            .map_err(|e| BackendError::NetworkUnavailable(e.to_string()))?;

        self.beacons.lock().unwrap_or_else(|e| e.into_inner()).push(handle);
        Ok(())
    }
}

// ── Pet stats ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cat {
    pub name: String,
    #[serde(default)]
    pub owner_username: String,
    pub happiness_level: u8,
    pub hunger_level: u8,
    #[serde(default)]
    pub image_file_name: Option<String>,
}

/// Body returned by the stat update endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatStats {
    pub cat_name: String,
    pub happiness_level: u8,
    pub hunger_level: u8,
}

#[derive(Deserialize)]
struct CatsResponse {
    #[serde(default)]
    cats: Vec<Cat>,
}

/// Cat happiness/hunger over REST.
pub struct HttpPetStatsBackend {
    api: ApiClient,
}

impl HttpPetStatsBackend {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    async fn list_cats(&self, credential: &Credential) -> Result<Vec<Cat>, BackendError> {
        let url = self.api.endpoint(&["api", "cats", &credential.username])?;
        let body: CatsResponse =
            ApiClient::send_json(self.api.client.get(url).bearer_auth(&credential.access_token)).await?;
        Ok(body.cats)
    }

    async fn change_stat(
        &self,
        credential: &Credential,
        cat: &str,
        stat: &str,
        change_amount: i32,
    ) -> Result<CatStats, BackendError> {
        let url = self.api.endpoint(&["api", "cats", &credential.username, cat, stat])?;
        let updated: CatStats = ApiClient::send_json(
            self.api
                .client
                .put(url)
                .bearer_auth(&credential.access_token)
                .json(&json!({ "changeAmount": change_amount })),
        )
        .await?;
        debug!(
            cat,
            stat,
            change_amount,
            happiness = updated.happiness_level,
            hunger = updated.hunger_level,
            "cat stat updated"
        );
        Ok(updated)
    }
}

impl PetStatsBackend for HttpPetStatsBackend {
    fn boost_happiness_after_focus<'a>(&'a self, credential: &'a Credential) -> BackendFuture<'a, HappinessBoost> {
        Box::pin(async move {
            let cats = self.list_cats(credential).await?;
            if cats.is_empty() {
                return Ok(HappinessBoost {
                    updated_count: 0,
                    failure_count: 0,
                    message: "Adopt a cat to share your focus sessions with!".into(),
                });
            }

            let mut updated = Vec::new();
            let mut failures = Vec::new();
            for cat in &cats {
                match self
                    .change_stat(credential, &cat.name, "happiness", HAPPINESS_BOOST)
                    .await
                {
                    Ok(_) => updated.push(cat.name.as_str()),
                    Err(BackendError::AuthExpired) => return Err(BackendError::AuthExpired),
                    Err(e) => {
                        warn!(cat = %cat.name, error = %e, "happiness boost failed");
                        failures.push(cat.name.as_str());
                    }
                }
            }

            if updated.is_empty() {
                return Err(BackendError::Rejected {
                    status: 0,
                    message: format!("could not update {}", failures.join(", ")),
                });
            }
            let mut message = format!("{} got happier from your focus session!", updated.join(", "));
            if !failures.is_empty() {
                message.push_str(&format!(" ({} could not be updated)", failures.join(", ")));
            }
            Ok(HappinessBoost {
                updated_count: updated.len() as u32,
                failure_count: failures.len() as u32,
                message,
            })
        })
    }

    fn decrease_stats_on_skip<'a>(&'a self, credential: &'a Credential) -> BackendFuture<'a, Option<SkipPenalty>> {
        Box::pin(async move {
            let cats = self.list_cats(credential).await?;
            if cats.is_empty() {
                return Ok(None);
            }

            let mut affected = Vec::new();
            let mut last_error = None;
            for cat in &cats {
                let happiness = self
                    .change_stat(credential, &cat.name, "happiness", -SKIP_HAPPINESS_PENALTY)
                    .await;
                let hunger = self
                    .change_stat(credential, &cat.name, "hunger", -SKIP_HUNGER_PENALTY)
                    .await;
                match (happiness, hunger) {
                    (Err(BackendError::AuthExpired), _) | (_, Err(BackendError::AuthExpired)) => {
                        return Err(BackendError::AuthExpired);
                    }
                    (Ok(_), Ok(_)) => affected.push(cat.name.as_str()),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(cat = %cat.name, error = %e, "skip penalty failed");
                        last_error = Some(e);
                    }
                }
            }

            match (affected.is_empty(), last_error) {
                (true, Some(e)) => Err(e),
                _ => Ok(Some(SkipPenalty {
                    message: format!(
                        "{} lost happiness and hunger because you skipped focus.",
                        affected.join(", ")
                    ),
                })),
            }
        })
    }
}
