use crate::ebay::config::{APP_ID, APP_SECRET, OAUTH_SCOPE, OAUTH_TOKEN_URL};
use crate::http::build_client;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("missing ebay app credentials in env")]
    MissingCredentials,
    #[error("oauth request failed: {0}")]
    Request(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

struct TokenSlot {
    token: String,
    expires_at: Instant,
}

/// Process-wide bearer credential for the marketplace API.
///
/// The slot is guarded by a tokio mutex held across the refresh, so
/// concurrent callers hitting an expired credential coalesce into a single
/// client-credentials exchange. The soft TTL sits short of the credential's
/// real lifetime to avoid edge-of-expiry failures.
pub struct CredentialCache {
    token_url: String,
    app_id: String,
    app_secret: String,
    ttl: Duration,
    http: Client,
    slot: Mutex<Option<TokenSlot>>,
}

impl CredentialCache {
    pub fn from_env() -> Self {
        let ttl = std::env::var("EBAY_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(7000);
        Self::new(
            OAUTH_TOKEN_URL.clone(),
            APP_ID.clone(),
            APP_SECRET.clone(),
            Duration::from_secs(ttl),
        )
    }

    pub fn new(
        token_url: impl Into<String>,
        app_id: impl Into<String>,
        app_secret: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            app_id: app_id.into(),
            app_secret: app_secret.into(),
            ttl,
            http: build_client(),
            slot: Mutex::new(None),
        }
    }

    /// Return the cached credential, refreshing it when absent or past its
    /// soft expiry.
    pub async fn get(&self) -> Result<String, EbayAuthError> {
        let mut slot = self.slot.lock().await;
        if let Some(existing) = slot.as_ref() {
            if Instant::now() < existing.expires_at {
                return Ok(existing.token.clone());
            }
        }
        let token = self.request_token().await?;
        *slot = Some(TokenSlot {
            token: token.clone(),
            expires_at: Instant::now() + self.ttl,
        });
        Ok(token)
    }

    /// Drop the cached credential; the next `get` requests a fresh one.
    /// Called on authentication failures from the search API.
    pub async fn invalidate(&self) {
        *self.slot.lock().await = None;
    }

    async fn request_token(&self) -> Result<String, EbayAuthError> {
        if self.app_id.is_empty() || self.app_secret.is_empty() {
            return Err(EbayAuthError::MissingCredentials);
        }
        let credentials = BASE64.encode(format!("{}:{}", self.app_id, self.app_secret));
        let response = self
            .http
            .post(&self.token_url)
            .header("Authorization", format!("Basic {credentials}"))
            .form(&[("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)])
            .send()
            .await
            .map_err(|err| EbayAuthError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(EbayAuthError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|err| EbayAuthError::Request(err.to_string()))?;
        info!(target = "poketrack.ebay", "acquired marketplace access token");
        Ok(payload.access_token)
    }
}
