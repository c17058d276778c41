//! Google token broker
//!
//! Acquires, caches and revokes the OAuth access token used for Drive
//! calls, and keeps the small session record (token, expiry, profile,
//! last backup, auto-backup flag) in durable key-value slots.
//!
//! At most one token request is outstanding at a time. A second caller
//! is rejected with the `request_in_flight` code rather than queued.

use crate::config::{SyncConfig, SESSION_GRACE_HOURS, TOKEN_SAFETY_MARGIN_SECS};
use crate::error::{AppError, Result};
use crate::platform::{
    ClientSettings, HttpRequest, HttpTransport, IdentityProvider, KeyValueStore, Prompt,
    TokenResponse,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OnceCell};

/// Durable slot names
pub mod slots {
    pub const USER: &str = "google_user";
    pub const AUTH_TIME: &str = "google_auth_time";
    pub const ACCESS_TOKEN: &str = "google_access_token";
    pub const ACCESS_TOKEN_EXPIRY: &str = "google_access_token_expiry";
    pub const LAST_BACKUP: &str = "google_last_backup";
    pub const AUTO_BACKUP: &str = "google_auto_backup";
}

/// Error code for a token request rejected by the single-flight guard
pub const REQUEST_IN_FLIGHT: &str = "request_in_flight";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Uninitialized,
    Initializing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    PendingRequest,
    ActiveSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleUser {
    pub email: String,
    pub name: String,
    pub picture: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub connected: bool,
    pub email: Option<String>,
    pub last_backup: Option<DateTime<Utc>>,
    pub auto_backup: bool,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + Duration::seconds(TOKEN_SAFETY_MARGIN_SECS)
    }
}

#[derive(Deserialize)]
struct UserInfo {
    email: String,
    name: Option<String>,
    picture: Option<String>,
}

pub struct TokenBroker {
    config: SyncConfig,
    identity: Arc<dyn IdentityProvider>,
    http: Arc<dyn HttpTransport>,
    slots: Arc<dyn KeyValueStore>,
    init: OnceCell<()>,
    state: RwLock<BrokerState>,
    token: RwLock<Option<CachedToken>>,
    /// Held for the lifetime of one token request
    pending: Mutex<()>,
}

impl TokenBroker {
    pub fn new(
        config: SyncConfig,
        identity: Arc<dyn IdentityProvider>,
        http: Arc<dyn HttpTransport>,
        slots: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            config,
            identity,
            http,
            slots,
            init: OnceCell::new(),
            state: RwLock::new(BrokerState::Uninitialized),
            token: RwLock::new(None),
            pending: Mutex::new(()),
        }
    }

    pub fn state(&self) -> BrokerState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn session_state(&self) -> SessionState {
        if self.pending.try_lock().is_err() {
            SessionState::PendingRequest
        } else if self.has_valid_token() {
            SessionState::ActiveSession
        } else {
            SessionState::NoSession
        }
    }

    /// Load the identity provider and restore a cached token. Runs once;
    /// a failed attempt leaves the broker uninitialized so it can retry.
    pub async fn initialize(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                self.set_state(BrokerState::Initializing);

                let result = self.load().await;
                self.set_state(match result {
                    Ok(()) => BrokerState::Ready,
                    Err(_) => BrokerState::Uninitialized,
                });
                result
            })
            .await?;

        Ok(())
    }

    async fn load(&self) -> Result<()> {
        if self.config.client_id.is_empty() {
            return Err(AppError::Config(
                "Google Client ID is not configured".to_string(),
            ));
        }

        let settings = ClientSettings {
            client_id: self.config.client_id.clone(),
            scope: self.config.scope.clone(),
        };
        self.identity.load(&settings).await?;

        self.restore_session().await?;
        tracing::info!("Token broker ready");
        Ok(())
    }

    async fn restore_session(&self) -> Result<()> {
        let token = self.slots.get(slots::ACCESS_TOKEN).await?;
        let expiry = self.slots.get(slots::ACCESS_TOKEN_EXPIRY).await?;

        let (Some(token), Some(expiry)) = (token, expiry) else {
            return Ok(());
        };

        match parse_millis(&expiry) {
            Some(expires_at) if expires_at > Utc::now() => {
                tracing::debug!("Restored cached access token");
                self.set_token(Some(CachedToken {
                    value: token,
                    expires_at,
                }));
            }
            _ => {
                tracing::debug!("Discarding expired access token");
                self.clear_token(false).await?;
            }
        }

        Ok(())
    }

    /// A token with more than the safety margin left, requesting a new
    /// one if needed.
    pub async fn get_access_token(&self) -> Result<String> {
        self.initialize().await?;

        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        match self.request_token(None).await {
            Ok(response) => Ok(response.access_token),
            Err(e) if needs_consent(&e) => {
                tracing::info!("Silent token request needs consent, prompting");

                let escalated = async {
                    let response = self.request_token(Some(Prompt::Consent)).await?;
                    self.fetch_user_profile(&response.access_token).await?;
                    Ok::<_, AppError>(response.access_token)
                }
                .await;

                match escalated {
                    Ok(token) => Ok(token),
                    Err(e) => Err(self.fail_session(e, AUTHORIZATION_FAILED).await),
                }
            }
            Err(e) if e.auth_code() == Some(REQUEST_IN_FLIGHT) => Err(e),
            Err(e) => Err(self.fail_session(e, AUTHORIZATION_FAILED).await),
        }
    }

    /// Interactive sign-in followed by a profile fetch
    pub async fn sign_in(&self) -> Result<GoogleUser> {
        let result = async {
            self.initialize().await?;
            let response = self.request_token(Some(Prompt::Consent)).await?;
            self.fetch_user_profile(&response.access_token).await
        }
        .await;

        match result {
            Ok(user) => {
                tracing::info!("Signed in as {}", user.email);
                Ok(user)
            }
            Err(e) => Err(self.fail_session(e, "Failed to sign in with Google").await),
        }
    }

    /// Revoke the token (best effort) and clear every session slot
    pub async fn sign_out(&self) -> Result<()> {
        self.initialize().await?;

        let cached = self
            .token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|t| t.value.clone());
        let token = match cached {
            Some(token) => Some(token),
            None => self.slots.get(slots::ACCESS_TOKEN).await?,
        };

        if let Some(token) = token {
            if let Err(e) = self.identity.revoke(&token).await {
                tracing::warn!("Token revoke failed: {}", e);
            }
        }

        self.clear_token(true).await?;
        self.slots.remove(slots::USER).await?;
        self.slots.remove(slots::LAST_BACKUP).await?;
        self.slots.remove(slots::AUTO_BACKUP).await?;

        tracing::info!("Signed out of Google");
        Ok(())
    }

    /// Valid token, or a profile fetched within the grace window.
    ///
    /// Reads the persisted token when nothing is cached yet, so the answer
    /// does not depend on whether the broker has been initialized.
    pub async fn is_signed_in(&self) -> Result<bool> {
        if self.has_valid_token() || self.has_persisted_token().await? {
            return Ok(true);
        }

        if self.slots.get(slots::USER).await?.is_none() {
            return Ok(false);
        }

        let auth_time = self.slots.get(slots::AUTH_TIME).await?;
        Ok(match auth_time.as_deref().and_then(parse_millis) {
            Some(at) => Utc::now() - at < Duration::hours(SESSION_GRACE_HOURS),
            None => false,
        })
    }

    pub async fn user(&self) -> Result<Option<GoogleUser>> {
        match self.slots.get(slots::USER).await? {
            Some(json) => Ok(serde_json::from_str(&json).ok()),
            None => Ok(None),
        }
    }

    pub async fn status(&self) -> Result<AuthStatus> {
        Ok(AuthStatus {
            connected: self.is_signed_in().await?,
            email: self.user().await?.map(|u| u.email),
            last_backup: self.last_backup().await?,
            auto_backup: self.auto_backup_enabled().await?,
        })
    }

    pub async fn update_last_backup_time(&self) -> Result<()> {
        let now = Utc::now().timestamp_millis().to_string();
        self.slots.set(slots::LAST_BACKUP, &now).await
    }

    pub async fn last_backup(&self) -> Result<Option<DateTime<Utc>>> {
        let value = self.slots.get(slots::LAST_BACKUP).await?;
        Ok(value.as_deref().and_then(parse_millis))
    }

    pub async fn auto_backup_enabled(&self) -> Result<bool> {
        Ok(self.slots.get(slots::AUTO_BACKUP).await?.as_deref() == Some("true"))
    }

    pub async fn set_auto_backup(&self, enabled: bool) -> Result<()> {
        self.slots
            .set(slots::AUTO_BACKUP, if enabled { "true" } else { "false" })
            .await
    }

    async fn request_token(&self, prompt: Option<Prompt>) -> Result<TokenResponse> {
        let _pending = self.pending.try_lock().map_err(|_| {
            AppError::authorization(
                "A Google token request is already in progress",
                Some(REQUEST_IN_FLIGHT.to_string()),
            )
        })?;

        tracing::debug!(
            "Requesting access token ({})",
            prompt.map(Prompt::as_str).unwrap_or("silent")
        );

        let response = self.identity.request_token(prompt).await?;

        if let Some(code) = response.error.clone() {
            let message = response
                .error_description
                .clone()
                .unwrap_or_else(|| code.clone());
            return Err(AppError::authorization(message, Some(code)));
        }

        self.store_token(&response.access_token, response.expires_in)
            .await?;
        Ok(response)
    }

    async fn store_token(&self, access_token: &str, expires_in: i64) -> Result<()> {
        let now = Utc::now();
        let expires_at = Duration::try_seconds(expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                AppError::authorization(
                    format!("Token lifetime out of range: {}s", expires_in),
                    Some("invalid_expiry".to_string()),
                )
            })?;

        self.set_token(Some(CachedToken {
            value: access_token.to_string(),
            expires_at,
        }));

        self.slots.set(slots::ACCESS_TOKEN, access_token).await?;
        self.slots
            .set(
                slots::ACCESS_TOKEN_EXPIRY,
                &expires_at.timestamp_millis().to_string(),
            )
            .await?;
        self.slots
            .set(slots::AUTH_TIME, &now.timestamp_millis().to_string())
            .await?;

        Ok(())
    }

    async fn fetch_user_profile(&self, access_token: &str) -> Result<GoogleUser> {
        let response = self
            .http
            .send(HttpRequest::get(&self.config.userinfo_url).bearer(access_token))
            .await?;

        if !response.is_success() {
            tracing::warn!(
                "Userinfo request failed ({}): {}",
                response.status,
                response.text()
            );
            return Err(AppError::authorization(
                "Failed to fetch Google user profile",
                None,
            ));
        }

        let info: UserInfo = serde_json::from_slice(&response.body)?;
        let user = GoogleUser {
            name: info.name.unwrap_or_else(|| info.email.clone()),
            picture: info.picture.unwrap_or_default(),
            email: info.email,
        };

        self.slots
            .set(slots::USER, &serde_json::to_string(&user)?)
            .await?;
        self.slots
            .set(slots::AUTH_TIME, &Utc::now().timestamp_millis().to_string())
            .await?;

        Ok(user)
    }

    /// Clear the session and wrap `error` as an authorization failure
    async fn fail_session(&self, error: AppError, fallback: &str) -> AppError {
        tracing::warn!("{}: {}", fallback, error);

        if let Err(e) = self.clear_token(true).await {
            tracing::error!("Failed to clear token: {}", e);
        }
        if let Err(e) = self.slots.remove(slots::USER).await {
            tracing::error!("Failed to clear cached profile: {}", e);
        }

        let code = error.auth_code().map(str::to_string);
        let message = match &code {
            Some(code) => format!("{}: {} ({})", fallback, error, code),
            None => format!("{}: {}", fallback, error),
        };
        AppError::authorization(message, code)
    }

    async fn clear_token(&self, remove_auth_time: bool) -> Result<()> {
        self.set_token(None);
        self.slots.remove(slots::ACCESS_TOKEN).await?;
        self.slots.remove(slots::ACCESS_TOKEN_EXPIRY).await?;
        if remove_auth_time {
            self.slots.remove(slots::AUTH_TIME).await?;
        }
        Ok(())
    }

    fn fresh_token(&self) -> Option<String> {
        let now = Utc::now();
        self.token
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .filter(|t| t.is_fresh(now))
            .map(|t| t.value.clone())
    }

    fn has_valid_token(&self) -> bool {
        self.fresh_token().is_some()
    }

    async fn has_persisted_token(&self) -> Result<bool> {
        if self.slots.get(slots::ACCESS_TOKEN).await?.is_none() {
            return Ok(false);
        }

        let expiry = self.slots.get(slots::ACCESS_TOKEN_EXPIRY).await?;
        let cutoff = Utc::now() + Duration::seconds(TOKEN_SAFETY_MARGIN_SECS);
        Ok(expiry
            .as_deref()
            .and_then(parse_millis)
            .is_some_and(|expires_at| expires_at > cutoff))
    }

    fn set_token(&self, token: Option<CachedToken>) {
        *self.token.write().unwrap_or_else(|p| p.into_inner()) = token;
    }

    fn set_state(&self, state: BrokerState) {
        *self.state.write().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

const AUTHORIZATION_FAILED: &str = "Google authorization failed. Please reconnect Google Drive.";

fn needs_consent(error: &AppError) -> bool {
    matches!(
        error.auth_code(),
        Some("consent_required") | Some("interaction_required")
    )
}

fn parse_millis(value: &str) -> Option<DateTime<Utc>> {
    let millis = value.trim().parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}
