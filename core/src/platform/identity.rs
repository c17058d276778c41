//! OAuth identity capability
//!
//! The host shell owns the actual consent UI (a browser popup, a system
//! web view, ...). The token broker only sees this trait.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Prompt hint for a token request. A silent request passes `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Consent,
    SelectAccount,
}

impl Prompt {
    pub fn as_str(self) -> &'static str {
        match self {
            Prompt::Consent => "consent",
            Prompt::SelectAccount => "select_account",
        }
    }
}

/// Token endpoint response. `error` is set instead of a token on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TokenResponse {
    pub fn granted(access_token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token: access_token.into(),
            expires_in,
            token_type: "Bearer".to_string(),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>, description: Option<String>) -> Self {
        Self {
            error: Some(error.into()),
            error_description: description,
            ..Default::default()
        }
    }
}

/// Request settings handed to the provider when it is loaded
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub client_id: String,
    pub scope: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Load whatever the provider needs (scripts, assets, discovery).
    async fn load(&self, settings: &ClientSettings) -> Result<()>;

    /// Ask for an access token, silently when `prompt` is `None`.
    async fn request_token(&self, prompt: Option<Prompt>) -> Result<TokenResponse>;

    /// Revoke a token with the provider.
    async fn revoke(&self, access_token: &str) -> Result<()>;
}
